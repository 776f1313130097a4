//! Token filters: small rewriting passes over a tokenised byte stream. A
//! filter sees every token of a content stream (including spaces and
//! comments) and writes replacement bytes to the downstream sink. Filters are
//! attached to streams as edit overlays and run when the stream is piped out.

use std::cell::RefCell;
use std::rc::Rc;

use crate::pipeline::{BufferSink, Sink, drive};
use crate::source::MemorySource;
use crate::tokenizer::{Token, TokenKind, Tokenizer};
use crate::Result;

pub trait TokenFilter {
    fn handle_token(&mut self, token: Token, writer: &mut dyn Sink) -> Result<()>;

    fn handle_eof(&mut self, _writer: &mut dyn Sink) -> Result<()> {
        Ok(())
    }
}

/// Re-serialise a token byte-exactly. Tokens coming from the tokeniser carry
/// their raw source spelling; synthesised tokens fall back to their value.
pub fn write_token(token: &Token, writer: &mut dyn Sink) -> Result<()> {
    if token.raw.is_empty() {
        writer.write_all(&token.value)
    } else {
        writer.write_all(&token.raw)
    }
}

/// Copies every token unchanged.
pub struct PassThrough;

impl TokenFilter for PassThrough {
    fn handle_token(&mut self, token: Token, writer: &mut dyn Sink) -> Result<()> {
        write_token(&token, writer)
    }
}

/// Normalises content-stream whitespace: runs of ignorable tokens collapse to
/// a single separator, and the separator after an operator is a newline so
/// each operation ends a line. Used by QDF mode.
#[derive(Default)]
pub struct ContentNormalizer {
    pending: Option<u8>,
    wrote_any: bool,
}

impl ContentNormalizer {
    pub fn new() -> Self {
        ContentNormalizer::default()
    }
}

impl TokenFilter for ContentNormalizer {
    fn handle_token(&mut self, token: Token, writer: &mut dyn Sink) -> Result<()> {
        match token.kind {
            TokenKind::Space | TokenKind::Comment => {
                if self.wrote_any && self.pending.is_none() {
                    self.pending = Some(b' ');
                }
                Ok(())
            }
            _ => {
                if let Some(separator) = self.pending.take() {
                    writer.write_all(&[separator])?;
                }
                write_token(&token, writer)?;
                self.wrote_any = true;
                if token.kind == TokenKind::Word || token.kind == TokenKind::InlineImage {
                    self.pending = Some(b'\n');
                }
                Ok(())
            }
        }
    }

    fn handle_eof(&mut self, writer: &mut dyn Sink) -> Result<()> {
        if self.pending.take() == Some(b'\n') {
            writer.write_all(b"\n")?;
        }
        Ok(())
    }
}

/// Run `data` through one filter, tokenising with ignorable tokens visible so
/// the filter controls all whitespace. Inline images are scanned as single
/// tokens so image bytes are never re-tokenised.
pub fn filter_once(data: &[u8], filter: &mut dyn TokenFilter, writer: &mut dyn Sink) -> Result<()> {
    let mut source = MemorySource::new("token filter", data.to_vec());
    let mut tokenizer = Tokenizer::new().include_ignorable().allow_eof();
    let mut after_id = false;
    loop {
        if after_id {
            tokenizer.expect_inline_image();
            after_id = false;
        }
        let token = tokenizer.read_token(&mut source, "token filter", true, 0)?;
        match token.kind {
            TokenKind::Eof => return filter.handle_eof(writer),
            TokenKind::Bad => {
                // Pass damaged bytes through untouched; rewriting them could
                // only make things worse.
                filter.handle_token(token, writer)?;
            }
            _ => {
                if token.is_word(b"ID") {
                    after_id = true;
                }
                filter.handle_token(token, writer)?;
            }
        }
    }
}

/// Apply a chain of filters, re-tokenising between stages.
pub fn apply_token_filters(
    data: &[u8], filters: &[Rc<RefCell<dyn TokenFilter>>], writer: &mut dyn Sink,
) -> Result<()> {
    match filters {
        [] => writer.write_all(data),
        [single] => drive(writer, |w| filter_once(data, &mut *single.borrow_mut(), w)),
        [first, rest @ ..] => {
            let mut buffer = BufferSink::new();
            drive(&mut buffer, |w| filter_once(data, &mut *first.borrow_mut(), w))?;
            apply_token_filters(&buffer.into_inner(), rest, writer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(data: &[u8], filter: &mut dyn TokenFilter) -> Vec<u8> {
        let mut out = BufferSink::new();
        drive(&mut out, |w| filter_once(data, filter, w)).unwrap();
        out.into_inner()
    }

    #[test]
    fn pass_through_is_byte_exact() {
        let data = b"BT /F1 12 Tf (Hi \\(there\\)) Tj % done\nET";
        assert_eq!(run(data, &mut PassThrough), data.to_vec());
    }

    #[test]
    fn normalizer_breaks_lines_after_operators() {
        let data = b"BT  /F1 12 Tf   (Hello)   Tj ET";
        assert_eq!(run(data, &mut ContentNormalizer::new()), b"BT\n/F1 12 Tf\n(Hello) Tj\nET\n".to_vec());
    }

    #[test]
    fn inline_image_bytes_survive() {
        let data = b"BI /W 2 ID \x00\x01)(\xff EI Q";
        let out = run(data, &mut PassThrough);
        assert_eq!(out, data.to_vec());
    }
}
