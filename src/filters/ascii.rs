//! ASCIIHexDecode and ASCII85Decode with their encoders.

use crate::pipeline::Sink;
use crate::tokenizer::hex_value;
use crate::{Error, Result};

pub struct AsciiHexDecoder<'a> {
    high: Option<u8>,
    done: bool,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> AsciiHexDecoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        AsciiHexDecoder {
            high: None,
            done: false,
            downstream,
        }
    }
}

impl Sink for AsciiHexDecoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &c in data {
            if self.done {
                break;
            }
            match c {
                b'>' => {
                    if let Some(high) = self.high.take() {
                        self.downstream.write_all(&[high << 4])?;
                    }
                    self.done = true;
                }
                c if c.is_ascii_whitespace() || c == b'\0' => {}
                c => {
                    let nibble = hex_value(c)
                        .ok_or_else(|| Error::InvalidStream("invalid character in ASCIIHex data".to_string()))?;
                    match self.high.take() {
                        Some(high) => self.downstream.write_all(&[(high << 4) | nibble])?,
                        None => self.high = Some(nibble),
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if let Some(high) = self.high.take() {
            self.downstream.write_all(&[high << 4])?;
        }
        self.downstream.finish()
    }
}

pub struct AsciiHexEncoder<'a> {
    column: usize,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> AsciiHexEncoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        AsciiHexEncoder { column: 0, downstream }
    }
}

impl Sink for AsciiHexEncoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &b in data {
            let hex = [HEX[(b >> 4) as usize], HEX[(b & 0x0F) as usize]];
            self.downstream.write_all(&hex)?;
            self.column += 2;
            if self.column >= 64 {
                self.downstream.write_all(b"\n")?;
                self.column = 0;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.downstream.write_all(b">")?;
        self.downstream.finish()
    }
}

const HEX: &[u8; 16] = b"0123456789abcdef";

pub struct Ascii85Decoder<'a> {
    group: [u8; 5],
    len: usize,
    saw_tilde: bool,
    done: bool,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> Ascii85Decoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        Ascii85Decoder {
            group: [0; 5],
            len: 0,
            saw_tilde: false,
            done: false,
            downstream,
        }
    }

    fn flush_group(&mut self, count: usize) -> Result<()> {
        // Missing digits decode as if padded with 'u'; one fewer output byte
        // per missing digit.
        for slot in self.group.iter_mut().skip(count) {
            *slot = b'u';
        }
        let mut value: u32 = 0;
        for &digit in &self.group {
            let digit = digit
                .checked_sub(b'!')
                .filter(|&d| d < 85)
                .ok_or_else(|| Error::InvalidStream("invalid character in ASCII85 data".to_string()))?;
            value = value
                .checked_mul(85)
                .and_then(|v| v.checked_add(u32::from(digit)))
                .ok_or_else(|| Error::InvalidStream("ASCII85 group out of range".to_string()))?;
        }
        let bytes = value.to_be_bytes();
        self.downstream.write_all(&bytes[..count - 1])?;
        self.len = 0;
        Ok(())
    }
}

impl Sink for Ascii85Decoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &c in data {
            if self.done {
                break;
            }
            if self.saw_tilde {
                if c == b'>' {
                    self.done = true;
                    if self.len > 0 {
                        if self.len == 1 {
                            return Err(Error::InvalidStream("lone trailing ASCII85 digit".to_string()));
                        }
                        let count = self.len;
                        self.flush_group(count)?;
                    }
                    continue;
                }
                self.saw_tilde = false;
            }
            match c {
                b'~' => self.saw_tilde = true,
                b'z' if self.len == 0 => self.downstream.write_all(&[0, 0, 0, 0])?,
                c if c.is_ascii_whitespace() || c == b'\0' => {}
                c => {
                    self.group[self.len] = c;
                    self.len += 1;
                    if self.len == 5 {
                        self.flush_group(5)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        // Tolerate a missing ~> end marker.
        if !self.done && self.len > 1 {
            let count = self.len;
            self.flush_group(count)?;
        }
        self.downstream.finish()
    }
}

pub struct Ascii85Encoder<'a> {
    group: [u8; 4],
    len: usize,
    column: usize,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> Ascii85Encoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        Ascii85Encoder {
            group: [0; 4],
            len: 0,
            column: 0,
            downstream,
        }
    }

    fn emit(&mut self, data: &[u8]) -> Result<()> {
        self.downstream.write_all(data)?;
        self.column += data.len();
        if self.column >= 72 {
            self.downstream.write_all(b"\n")?;
            self.column = 0;
        }
        Ok(())
    }

    fn flush_group(&mut self) -> Result<()> {
        let count = self.len;
        if count == 0 {
            return Ok(());
        }
        for slot in self.group.iter_mut().skip(count) {
            *slot = 0;
        }
        let value = u32::from_be_bytes(self.group);
        if value == 0 && count == 4 {
            self.len = 0;
            return self.emit(b"z");
        }
        let mut digits = [0u8; 5];
        let mut value = value;
        for digit in digits.iter_mut().rev() {
            *digit = (value % 85) as u8 + b'!';
            value /= 85;
        }
        self.len = 0;
        self.emit(&digits[..count + 1])
    }
}

impl Sink for Ascii85Encoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        for &b in data {
            self.group[self.len] = b;
            self.len += 1;
            if self.len == 4 {
                self.flush_group()?;
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.flush_group()?;
        self.downstream.write_all(b"~>")?;
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

    fn run(make: impl for<'a> FnOnce(Box<dyn Sink + 'a>) -> Box<dyn Sink + 'a>, data: &[u8]) -> Vec<u8> {
        let mut out = BufferSink::new();
        {
            let mut stage = make(Box::new(Capture(&mut out)));
            stage.write_all(data).unwrap();
            stage.finish().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn hex_decode_ignores_whitespace_and_pads() {
        let out = run(|d| Box::new(AsciiHexDecoder::new(d)), b"48 65 6c\n6C 6F 7>");
        assert_eq!(out, b"Hello\x70");
    }

    #[test]
    fn hex_round_trip() {
        let plain = b"binary \x00\xff data".to_vec();
        let encoded = run(|d| Box::new(AsciiHexEncoder::new(d)), &plain);
        let decoded = run(|d| Box::new(AsciiHexDecoder::new(d)), &encoded);
        assert_eq!(decoded, plain);
    }

    #[test]
    fn ascii85_decodes_spec_example() {
        let out = run(|d| Box::new(Ascii85Decoder::new(d)), b"F*2M7~>");
        assert_eq!(out, b"sure");
    }

    #[test]
    fn ascii85_z_shorthand() {
        let out = run(|d| Box::new(Ascii85Decoder::new(d)), b"z~>");
        assert_eq!(out, vec![0, 0, 0, 0]);
    }

    #[test]
    fn ascii85_partial_group() {
        let plain = b"hello".to_vec();
        let encoded = run(|d| Box::new(Ascii85Encoder::new(d)), &plain);
        let decoded = run(|d| Box::new(Ascii85Decoder::new(d)), &encoded);
        assert_eq!(decoded, plain);
    }

    #[test]
    fn ascii85_round_trip_with_zero_group() {
        let plain = b"ab\x00\x00\x00\x00cd".to_vec();
        let encoded = run(|d| Box::new(Ascii85Encoder::new(d)), &plain);
        let decoded = run(|d| Box::new(Ascii85Decoder::new(d)), &encoded);
        assert_eq!(decoded, plain);
    }
}
