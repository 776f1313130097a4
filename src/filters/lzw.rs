//! LZW decode via `weezl`. PDF's default `EarlyChange 1` matches the TIFF
//! code-size switch.

use std::io;

use weezl::BitOrder;

use crate::pipeline::Sink;
use crate::{Error, Result};

pub struct LzwDecoder<'a> {
    early_change: bool,
    input: Vec<u8>,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> LzwDecoder<'a> {
    pub fn new(early_change: bool, downstream: Box<dyn Sink + 'a>) -> Self {
        LzwDecoder {
            early_change,
            input: Vec::new(),
            downstream,
        }
    }
}

impl Sink for LzwDecoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.input.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut decoder = if self.early_change {
            weezl::decode::Decoder::with_tiff_size_switch(BitOrder::Msb, 8)
        } else {
            weezl::decode::Decoder::new(BitOrder::Msb, 8)
        };
        let result = {
            let mut adapter = SinkWrite {
                sink: &mut *self.downstream,
                error: None,
            };
            let outcome = decoder.into_stream(&mut adapter).decode_all(self.input.as_slice());
            match adapter.error.take() {
                Some(error) => Err(error),
                None => outcome
                    .status
                    .map_err(|_| Error::InvalidStream("corrupt LZW data".to_string())),
            }
        };
        let finished = self.downstream.finish();
        result.and(finished)
    }
}

struct SinkWrite<'a> {
    sink: &'a mut dyn Sink,
    error: Option<Error>,
}

impl io::Write for SinkWrite<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.sink.write_all(buf) {
            Ok(()) => Ok(buf.len()),
            Err(error) => {
                self.error = Some(error);
                Err(io::Error::other("sink error"))
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
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
    fn decodes_known_vector() {
        // "-----A---B" encoded with early change, from the PDF reference.
        let encoded = [0x80, 0x0B, 0x60, 0x50, 0x22, 0x0C, 0x0C, 0x85, 0x01];
        let mut out = BufferSink::new();
        {
            let mut decoder = LzwDecoder::new(true, Box::new(Capture(&mut out)));
            decoder.write_all(&encoded).unwrap();
            decoder.finish().unwrap();
        }
        assert_eq!(out.data(), b"-----A---B");
    }
}
