//! Flate codec on top of the streaming `flate2` primitives, so decoding a
//! large stream never holds more than one scratch window in memory.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::pipeline::Sink;
use crate::{Error, Result};

const SCRATCH: usize = 32 * 1024;

pub struct FlateDecoder<'a> {
    inner: Decompress,
    downstream: Box<dyn Sink + 'a>,
    done: bool,
}

impl<'a> FlateDecoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        FlateDecoder {
            inner: Decompress::new(true),
            downstream,
            done: false,
        }
    }
}

impl Sink for FlateDecoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.done {
            // Trailing bytes after the zlib stream are common and ignored.
            return Ok(());
        }
        let mut scratch = vec![0u8; SCRATCH];
        let mut offset = 0;
        while offset < data.len() {
            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .decompress(&data[offset..], &mut scratch, FlushDecompress::None)
                .map_err(|_| Error::InvalidStream("corrupt flate data".to_string()))?;
            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            self.downstream.write_all(&scratch[..produced])?;
            offset += consumed;
            match status {
                Status::StreamEnd => {
                    self.done = true;
                    return Ok(());
                }
                Status::BufError if consumed == 0 && produced == 0 => {
                    return Err(Error::InvalidStream("flate stream stalled".to_string()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut scratch = vec![0u8; SCRATCH];
        while !self.done {
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .decompress(&[], &mut scratch, FlushDecompress::Finish)
                .map_err(|_| Error::InvalidStream("corrupt flate data".to_string()))?;
            let produced = (self.inner.total_out() - before_out) as usize;
            self.downstream.write_all(&scratch[..produced])?;
            match status {
                Status::StreamEnd => break,
                _ if produced == 0 => {
                    // Truncated input: emit what we have rather than failing
                    // the whole stream.
                    break;
                }
                _ => {}
            }
        }
        self.downstream.finish()
    }
}

pub struct FlateEncoder<'a> {
    inner: Compress,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> FlateEncoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        FlateEncoder {
            inner: Compress::new(Compression::default(), true),
            downstream,
        }
    }
}

impl Sink for FlateEncoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut scratch = vec![0u8; SCRATCH];
        let mut offset = 0;
        while offset < data.len() {
            let before_in = self.inner.total_in();
            let before_out = self.inner.total_out();
            self.inner
                .compress(&data[offset..], &mut scratch, FlushCompress::None)
                .map_err(|_| Error::InvalidStream("flate compression failed".to_string()))?;
            let consumed = (self.inner.total_in() - before_in) as usize;
            let produced = (self.inner.total_out() - before_out) as usize;
            self.downstream.write_all(&scratch[..produced])?;
            offset += consumed;
            if consumed == 0 && produced == 0 {
                return Err(Error::InvalidStream("flate compression stalled".to_string()));
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut scratch = vec![0u8; SCRATCH];
        loop {
            let before_out = self.inner.total_out();
            let status = self
                .inner
                .compress(&[], &mut scratch, FlushCompress::Finish)
                .map_err(|_| Error::InvalidStream("flate compression failed".to_string()))?;
            let produced = (self.inner.total_out() - before_out) as usize;
            self.downstream.write_all(&scratch[..produced])?;
            if status == Status::StreamEnd {
                break;
            }
        }
        self.downstream.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BufferSink;

    struct Capture<'a>(&'a mut BufferSink);

    impl Sink for Capture<'_> {
        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.0.write_all(data)
        }
    }

    #[test]
    fn round_trip_in_small_chunks() {
        let plain: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let mut compressed = BufferSink::new();
        {
            let mut encoder = FlateEncoder::new(Box::new(Capture(&mut compressed)));
            for chunk in plain.chunks(7) {
                encoder.write_all(chunk).unwrap();
            }
            encoder.finish().unwrap();
        }
        let mut decoded = BufferSink::new();
        {
            let mut decoder = FlateDecoder::new(Box::new(Capture(&mut decoded)));
            for chunk in compressed.data().chunks(11).map(<[u8]>::to_vec).collect::<Vec<_>>() {
                decoder.write_all(&chunk).unwrap();
            }
            decoder.finish().unwrap();
        }
        assert_eq!(decoded.data(), plain.as_slice());
    }

    #[test]
    fn corrupt_data_is_an_error() {
        let mut out = BufferSink::new();
        let mut decoder = FlateDecoder::new(Box::new(Capture(&mut out)));
        assert!(decoder.write_all(b"definitely not zlib").is_err());
    }
}
