//! RunLengthDecode: a length byte under 128 copies that many + 1 literal
//! bytes; over 128 repeats the next byte 257 - length times; 128 ends.

use crate::pipeline::Sink;
use crate::Result;

enum State {
    Length,
    Literal(usize),
    Repeat(usize),
    Done,
}

pub struct RunLengthDecoder<'a> {
    state: State,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> RunLengthDecoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        RunLengthDecoder {
            state: State::Length,
            downstream,
        }
    }
}

impl Sink for RunLengthDecoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut i = 0;
        while i < data.len() {
            match self.state {
                State::Length => {
                    let length = data[i];
                    i += 1;
                    self.state = match length {
                        128 => State::Done,
                        0..=127 => State::Literal(length as usize + 1),
                        _ => State::Repeat(257 - length as usize),
                    };
                }
                State::Literal(remaining) => {
                    let take = remaining.min(data.len() - i);
                    self.downstream.write_all(&data[i..i + take])?;
                    i += take;
                    self.state = if take == remaining {
                        State::Length
                    } else {
                        State::Literal(remaining - take)
                    };
                }
                State::Repeat(count) => {
                    let run = vec![data[i]; count];
                    self.downstream.write_all(&run)?;
                    i += 1;
                    self.state = State::Length;
                }
                State::Done => return Ok(()),
            }
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.downstream.finish()
    }
}

pub struct RunLengthEncoder<'a> {
    input: Vec<u8>,
    downstream: Box<dyn Sink + 'a>,
}

impl<'a> RunLengthEncoder<'a> {
    pub fn new(downstream: Box<dyn Sink + 'a>) -> Self {
        RunLengthEncoder {
            input: Vec::new(),
            downstream,
        }
    }
}

impl Sink for RunLengthEncoder<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.input.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut i = 0;
        let data = std::mem::take(&mut self.input);
        while i < data.len() {
            let run_end = {
                let mut j = i + 1;
                while j < data.len() && j - i < 128 && data[j] == data[i] {
                    j += 1;
                }
                j
            };
            if run_end - i >= 2 {
                self.downstream.write_all(&[(257 - (run_end - i)) as u8, data[i]])?;
                i = run_end;
            } else {
                // Literal run up to the next repeat of length >= 3.
                let mut j = i + 1;
                while j < data.len() && j - i < 128 {
                    if j + 2 < data.len() && data[j] == data[j + 1] && data[j] == data[j + 2] {
                        break;
                    }
                    j += 1;
                }
                self.downstream.write_all(&[(j - i - 1) as u8])?;
                self.downstream.write_all(&data[i..j])?;
                i = j;
            }
        }
        self.downstream.write_all(&[128])?;
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

    fn decode(data: &[u8]) -> Vec<u8> {
        let mut out = BufferSink::new();
        {
            let mut decoder = RunLengthDecoder::new(Box::new(Capture(&mut out)));
            decoder.write_all(data).unwrap();
            decoder.finish().unwrap();
        }
        out.into_inner()
    }

    #[test]
    fn literal_and_repeat_runs() {
        assert_eq!(decode(b"\x02abc\xfex\x80"), b"abcxxx");
    }

    #[test]
    fn split_across_writes() {
        let mut out = BufferSink::new();
        {
            let mut decoder = RunLengthDecoder::new(Box::new(Capture(&mut out)));
            decoder.write_all(b"\x04ab").unwrap();
            decoder.write_all(b"cde\xfd").unwrap();
            decoder.write_all(b"z\x80").unwrap();
            decoder.finish().unwrap();
        }
        assert_eq!(out.data(), b"abcdezzzz");
    }

    #[test]
    fn encode_decode_round_trip() {
        let plain = b"aaaaaabcdefffffffffgh  ij".to_vec();
        let mut encoded = BufferSink::new();
        {
            let mut encoder = RunLengthEncoder::new(Box::new(Capture(&mut encoded)));
            encoder.write_all(&plain).unwrap();
            encoder.finish().unwrap();
        }
        assert_eq!(decode(encoded.data()), plain);
    }
}
