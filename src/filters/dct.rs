//! Lossy DCT (JPEG) decode behind the `dct` feature. Produces raw samples in
//! component order, the same shape other decoders hand downstream.

use image::ImageReader;
use std::io::Cursor;

use crate::pipeline::Sink;
use crate::{Error, Result};

/// Compressed input larger than this is refused.
pub const MAX_DCT_BYTES: usize = 100 * 1024 * 1024;

pub struct DctDecoder<'a> {
    input: Vec<u8>,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> DctDecoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        DctDecoder {
            input: Vec::new(),
            downstream,
        }
    }
}

impl Sink for DctDecoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if self.input.len() + data.len() > MAX_DCT_BYTES {
            return Err(Error::MemoryLimit {
                context: "dct",
                limit: MAX_DCT_BYTES,
            });
        }
        self.input.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let result = ImageReader::with_format(Cursor::new(&self.input), image::ImageFormat::Jpeg)
            .decode()
            .map_err(|e| Error::InvalidStream(format!("corrupt JPEG data: {e}")))
            .and_then(|image| self.downstream.write_all(image.into_bytes().as_slice()));
        let finished = self.downstream.finish();
        result.and(finished)
    }
}
