//! The PDF tokeniser. One finite-state machine serves both interfaces: a push
//! interface (`present_character` / `present_eof` / `take_token`) used by the
//! token-filter plumbing, and a pull interface (`read_token`) that drives a
//! [`Source`] through a small read-ahead buffer.

use std::io::SeekFrom;

use crate::source::Source;
use crate::{Error, ParseError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Bad,
    ArrayOpen,
    ArrayClose,
    DictOpen,
    DictClose,
    BraceOpen,
    BraceClose,
    Integer,
    Real,
    Name,
    String,
    Null,
    Bool,
    Word,
    Eof,
    Space,
    Comment,
    InlineImage,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Cooked value: string contents with escapes resolved, names with `#hh`
    /// resolved, otherwise the token text.
    pub value: Vec<u8>,
    /// The exact source bytes, for byte-exact re-serialisation.
    pub raw: Vec<u8>,
    /// Offset of the first raw byte, when produced by the pull interface.
    pub offset: u64,
    pub error: Option<String>,
}

impl Token {
    fn new(kind: TokenKind, value: Vec<u8>, raw: Vec<u8>) -> Token {
        Token { kind, value, raw, offset: 0, error: None }
    }

    pub fn is_word(&self, word: &[u8]) -> bool {
        self.kind == TokenKind::Word && self.value == word
    }

    /// Ignorable tokens are suppressed unless the tokeniser was put in
    /// include-ignorable mode.
    pub fn is_ignorable(&self) -> bool {
        matches!(self.kind, TokenKind::Space | TokenKind::Comment)
    }

    pub fn integer_value(&self) -> i64 {
        std::str::from_utf8(&self.value).ok().and_then(|s| {
            let s = s.strip_prefix('+').unwrap_or(s);
            s.parse().ok()
        }).unwrap_or(0)
    }

    pub fn bool_value(&self) -> bool {
        self.value == b"true"
    }
}

pub fn is_whitespace(c: u8) -> bool {
    matches!(c, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

pub fn is_delimiter(c: u8) -> bool {
    matches!(c, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

pub fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Top,
    Space,
    Comment,
    Lt,
    Gt,
    LiteralString,
    StringEscape,
    StringOctal,
    StringCr,
    HexString,
    Name,
    NameHex1,
    NameHex2,
    Sign,
    Number,
    Decimal,
    Word,
    InlineImage,
    Ready,
}

/// The shared FSM. `feed`ing bytes moves it forward; when a token completes it
/// parks in `Ready` until [`Tokenizer::take_token`] is called.
pub struct Tokenizer {
    state: State,
    value: Vec<u8>,
    raw: Vec<u8>,
    kind: TokenKind,
    error: Option<String>,
    /// Whether the byte that terminated the token belongs to the next one.
    needs_unread: bool,
    include_ignorable: bool,
    allow_eof: bool,
    max_len: usize,
    string_depth: usize,
    octal: Vec<u8>,
    name_hex: u8,
    bad_name: bool,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Tokenizer::new()
    }
}

impl Tokenizer {
    pub fn new() -> Tokenizer {
        Tokenizer {
            state: State::Top,
            value: Vec::new(),
            raw: Vec::new(),
            kind: TokenKind::Bad,
            error: None,
            needs_unread: false,
            include_ignorable: false,
            allow_eof: false,
            max_len: 0,
            string_depth: 0,
            octal: Vec::new(),
            name_hex: 0,
            bad_name: false,
        }
    }

    /// Emit `Space` and `Comment` tokens instead of skipping them.
    pub fn include_ignorable(mut self) -> Self {
        self.include_ignorable = true;
        self
    }

    /// Turn end of input into an `Eof` token instead of an error.
    pub fn allow_eof(mut self) -> Self {
        self.allow_eof = true;
        self
    }

    pub fn reset(&mut self) {
        let include_ignorable = self.include_ignorable;
        let allow_eof = self.allow_eof;
        let max_len = self.max_len;
        *self = Tokenizer::new();
        self.include_ignorable = include_ignorable;
        self.allow_eof = allow_eof;
        self.max_len = max_len;
    }

    fn finish(&mut self, kind: TokenKind, unread: bool) {
        self.kind = kind;
        self.needs_unread = unread;
        self.state = State::Ready;
        if unread {
            self.raw.pop();
        }
    }

    fn fail(&mut self, message: impl Into<String>, unread: bool) {
        self.error = Some(message.into());
        self.finish(TokenKind::Bad, unread);
    }

    /// Push one byte into the FSM. Returns true when a token is ready.
    pub fn present_character(&mut self, c: u8) -> bool {
        if self.state == State::Ready {
            return true;
        }
        self.raw.push(c);
        if self.max_len > 0 && self.raw.len() > self.max_len {
            self.fail("token too long", false);
            return true;
        }
        self.step(c);
        self.state == State::Ready
    }

    /// Signal end of input. Returns true when a token is ready (possibly a
    /// `Bad` one for states that cannot end at EOF).
    pub fn present_eof(&mut self) -> bool {
        match self.state {
            State::Ready => {}
            State::Top => {
                if self.allow_eof {
                    self.finish(TokenKind::Eof, false);
                } else {
                    self.fail("unexpected end of input", false);
                }
            }
            State::Space => self.finish(TokenKind::Space, false),
            State::Comment => self.finish(TokenKind::Comment, false),
            State::Number => self.finish(TokenKind::Integer, false),
            State::Decimal => self.finish(TokenKind::Real, false),
            State::Sign => self.finish(TokenKind::Word, false),
            State::Word => self.finish_word(false),
            State::Name => self.finish_name(false),
            State::Lt => self.fail("unexpected < at end of input", false),
            State::Gt => self.fail("unexpected > at end of input", false),
            State::LiteralString
            | State::StringEscape
            | State::StringOctal
            | State::StringCr
            | State::HexString
            | State::NameHex1
            | State::NameHex2
            | State::InlineImage => self.fail("unterminated token at end of input", false),
        }
        true
    }

    /// Take the completed token and reset for the next one. The flag reports
    /// whether the terminating byte must be fed again for the next token.
    pub fn take_token(&mut self) -> (Token, bool) {
        debug_assert_eq!(self.state, State::Ready);
        let token = Token {
            kind: self.kind,
            value: std::mem::take(&mut self.value),
            raw: std::mem::take(&mut self.raw),
            offset: 0,
            error: self.error.take(),
        };
        let unread = self.needs_unread;
        self.state = State::Top;
        self.needs_unread = false;
        self.string_depth = 0;
        self.octal.clear();
        self.bad_name = false;
        (token, unread)
    }

    fn finish_word(&mut self, unread: bool) {
        let kind = match self.value.as_slice() {
            b"true" | b"false" => TokenKind::Bool,
            b"null" => TokenKind::Null,
            _ => TokenKind::Word,
        };
        self.finish(kind, unread);
    }

    fn finish_name(&mut self, unread: bool) {
        if self.bad_name {
            self.fail("invalid # escape in name", unread);
        } else {
            self.finish(TokenKind::Name, unread);
        }
    }

    fn step(&mut self, c: u8) {
        match self.state {
            State::Ready => unreachable!("fed a byte to a parked tokenizer"),
            State::Top => self.step_top(c),
            State::Space => {
                if is_whitespace(c) {
                    self.value.push(c);
                } else {
                    self.finish(TokenKind::Space, true);
                }
            }
            State::Comment => {
                if c == b'\r' || c == b'\n' {
                    self.finish(TokenKind::Comment, true);
                } else {
                    self.value.push(c);
                }
            }
            State::Lt => {
                if c == b'<' {
                    self.value.extend_from_slice(b"<<");
                    self.finish(TokenKind::DictOpen, false);
                } else {
                    self.state = State::HexString;
                    self.step(c);
                }
            }
            State::Gt => {
                if c == b'>' {
                    self.value.extend_from_slice(b">>");
                    self.finish(TokenKind::DictClose, false);
                } else {
                    self.fail("unexpected >", true);
                }
            }
            State::LiteralString => match c {
                b'\\' => self.state = State::StringEscape,
                b'(' => {
                    self.string_depth += 1;
                    self.value.push(c);
                }
                b')' => {
                    if self.string_depth == 0 {
                        self.finish(TokenKind::String, false);
                    } else {
                        self.string_depth -= 1;
                        self.value.push(c);
                    }
                }
                _ => self.value.push(c),
            },
            State::StringEscape => {
                self.state = State::LiteralString;
                match c {
                    b'n' => self.value.push(b'\n'),
                    b'r' => self.value.push(b'\r'),
                    b't' => self.value.push(b'\t'),
                    b'b' => self.value.push(b'\x08'),
                    b'f' => self.value.push(b'\x0C'),
                    b'0'..=b'7' => {
                        self.octal.clear();
                        self.octal.push(c);
                        self.state = State::StringOctal;
                    }
                    // A backslash before an EOL continues the line.
                    b'\n' => {}
                    b'\r' => self.state = State::StringCr,
                    other => self.value.push(other),
                }
            }
            State::StringOctal => {
                if c.is_ascii_digit() && c < b'8' && self.octal.len() < 3 {
                    self.octal.push(c);
                } else {
                    self.push_octal();
                    self.state = State::LiteralString;
                    self.step(c);
                }
            }
            State::StringCr => {
                // Swallow the LF of a CRLF continuation.
                self.state = State::LiteralString;
                if c != b'\n' {
                    self.step(c);
                }
            }
            State::HexString => match c {
                b'>' => {
                    if self.octal.len() == 1 {
                        let high = self.octal.pop().unwrap();
                        self.value.push(hex_value(high).unwrap_or(0) << 4);
                    }
                    self.finish(TokenKind::String, false);
                }
                c if is_whitespace(c) => {}
                c if c.is_ascii_hexdigit() => {
                    if self.octal.is_empty() {
                        self.octal.push(c);
                    } else {
                        let high = self.octal.pop().unwrap();
                        self.value.push((hex_value(high).unwrap_or(0) << 4) | hex_value(c).unwrap_or(0));
                    }
                }
                _ => self.fail("invalid character in hexadecimal string", false),
            },
            State::Name => match c {
                b'#' => self.state = State::NameHex1,
                c if is_regular(c) => self.value.push(c),
                _ => self.finish_name(true),
            },
            State::NameHex1 => match hex_value(c) {
                Some(v) => {
                    self.name_hex = v << 4;
                    self.state = State::NameHex2;
                }
                None => {
                    self.bad_name = true;
                    self.value.push(b'#');
                    self.state = State::Name;
                    if is_regular(c) {
                        self.step(c);
                    } else {
                        self.finish_name(true);
                    }
                }
            },
            State::NameHex2 => match hex_value(c) {
                Some(v) => {
                    self.value.push(self.name_hex | v);
                    self.state = State::Name;
                }
                None => {
                    self.bad_name = true;
                    self.state = State::Name;
                    if is_regular(c) {
                        self.step(c);
                    } else {
                        self.finish_name(true);
                    }
                }
            },
            State::Sign => match c {
                b'0'..=b'9' => {
                    self.value.push(c);
                    self.state = State::Number;
                }
                b'.' => {
                    self.value.push(c);
                    self.state = State::Decimal;
                }
                c if is_regular(c) => {
                    self.value.push(c);
                    self.state = State::Word;
                }
                _ => self.finish(TokenKind::Word, true),
            },
            State::Number => match c {
                b'0'..=b'9' => self.value.push(c),
                b'.' => {
                    self.value.push(c);
                    self.state = State::Decimal;
                }
                c if is_regular(c) => {
                    self.value.push(c);
                    self.state = State::Word;
                }
                _ => self.finish(TokenKind::Integer, true),
            },
            State::Decimal => match c {
                b'0'..=b'9' => self.value.push(c),
                c if is_regular(c) => {
                    // A second dot or a stray letter degrades this to a word.
                    self.value.push(c);
                    self.state = State::Word;
                }
                _ => self.finish(TokenKind::Real, true),
            },
            State::Word => {
                if is_regular(c) {
                    self.value.push(c);
                } else {
                    self.finish_word(true);
                }
            }
            State::InlineImage => {
                self.value.push(c);
                if !is_regular(c) {
                    if let Some(end) = inline_image_end(&self.value) {
                        self.value.truncate(end);
                        self.finish(TokenKind::InlineImage, true);
                    }
                }
            }
        }
    }

    fn step_top(&mut self, c: u8) {
        match c {
            c if is_whitespace(c) => {
                if self.include_ignorable {
                    self.value.push(c);
                    self.state = State::Space;
                } else {
                    self.raw.clear();
                }
            }
            b'%' => {
                if self.include_ignorable {
                    self.value.push(c);
                    self.state = State::Comment;
                } else {
                    self.raw.clear();
                    self.state = State::Comment;
                }
            }
            b'(' => self.state = State::LiteralString,
            b'<' => self.state = State::Lt,
            b'>' => self.state = State::Gt,
            b'[' => {
                self.value.push(c);
                self.finish(TokenKind::ArrayOpen, false);
            }
            b']' => {
                self.value.push(c);
                self.finish(TokenKind::ArrayClose, false);
            }
            b'{' => {
                self.value.push(c);
                self.finish(TokenKind::BraceOpen, false);
            }
            b'}' => {
                self.value.push(c);
                self.finish(TokenKind::BraceClose, false);
            }
            b'/' => self.state = State::Name,
            b')' => self.fail("unexpected )", false),
            b'+' | b'-' => {
                self.value.push(c);
                self.state = State::Sign;
            }
            b'0'..=b'9' => {
                self.value.push(c);
                self.state = State::Number;
            }
            b'.' => {
                self.value.push(c);
                self.state = State::Decimal;
            }
            other => {
                self.value.push(other);
                self.state = State::Word;
            }
        }
    }

    fn push_octal(&mut self) {
        let mut v: u16 = 0;
        for &d in &self.octal {
            v = (v << 3) | u16::from(d - b'0');
        }
        // Overflow is ignored per spec.
        self.value.push(v as u8);
        self.octal.clear();
    }

    /// Switch to inline-image scanning: bytes are swallowed until a
    /// whitespace-`EI`-whitespace terminator is found. Used right after the
    /// `ID` operator (and the single whitespace byte that follows it).
    pub fn expect_inline_image(&mut self) {
        self.state = State::InlineImage;
        self.value.clear();
        self.raw.clear();
    }

    /// Pull one token from `source`. `context` names the caller for error
    /// messages; with `allow_bad` the `Bad` token is returned instead of an
    /// error; `max_len` (0 = unlimited) bounds the token size, leaving the
    /// source at the start of the oversized token.
    pub fn read_token(
        &mut self, source: &mut dyn Source, context: &str, allow_bad: bool, max_len: usize,
    ) -> Result<Token> {
        self.max_len = max_len;
        let mut start = source.tell();
        let mut buf = [0u8; 128];
        let mut consumed = start;
        'outer: loop {
            let n = source.read(&mut buf)?;
            if n == 0 {
                self.present_eof();
                break;
            }
            for (i, &c) in buf[..n].iter().enumerate() {
                let at = source.last_offset() + i as u64;
                let before = self.state;
                let ready = self.present_character(c);
                // Leaving Top marks where the pending token began.
                if before == State::Top && self.state != State::Top {
                    start = at;
                }
                if ready {
                    consumed = at + 1;
                    break 'outer;
                }
            }
            consumed = source.last_offset() + n as u64;
        }
        let (mut token, unread) = self.take_token();
        self.max_len = 0;
        let rewind = if unread { 1 } else { 0 };
        source.seek(SeekFrom::Start(consumed - rewind))?;
        token.offset = start;
        if token.kind == TokenKind::Bad {
            if token.error.as_deref() == Some("token too long") {
                source.seek(SeekFrom::Start(start))?;
            }
            if !allow_bad {
                let message = token.error.as_deref().unwrap_or("bad token");
                log::warn!("{context}: {message}");
                return Err(Error::Parse(ParseError::BadToken {
                    offset: start,
                    message: message.to_string(),
                }));
            }
        }
        // Suppressed comments produce no token at all; read the next one.
        if token.kind == TokenKind::Comment && !self.include_ignorable {
            return self.read_token(source, context, allow_bad, max_len);
        }
        Ok(token)
    }
}

pub(crate) fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

/// If `data` (which ends with a non-regular byte) ends with an inline-image
/// terminator, return the length of the image payload: everything before the
/// whitespace that precedes `EI`.
fn inline_image_end(data: &[u8]) -> Option<usize> {
    if data.len() < 4 {
        return None;
    }
    let last = data[data.len() - 1];
    if !(is_whitespace(last) || is_delimiter(last)) {
        return None;
    }
    let ei = data.len() - 3;
    if &data[ei..ei + 2] != b"EI" {
        return None;
    }
    if ei == 0 || !is_whitespace(data[ei - 1]) {
        return None;
    }
    Some(ei - 1)
}

impl Error {
    fn context_message(self, context: &str, message: &str) -> Error {
        log::warn!("{context}: {message}");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn tokens(input: &[u8]) -> Vec<Token> {
        let mut source = MemorySource::new("test", input.to_vec());
        let mut tokenizer = Tokenizer::new().allow_eof();
        let mut out = Vec::new();
        loop {
            let token = tokenizer.read_token(&mut source, "test", true, 0).unwrap();
            let done = token.kind == TokenKind::Eof;
            out.push(token);
            if done {
                break;
            }
        }
        out
    }

    fn kinds(input: &[u8]) -> Vec<TokenKind> {
        tokens(input).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn basic_tokens() {
        assert_eq!(
            kinds(b"<< /Name [1 2.5 (str) <AB> true null R] >>"),
            vec![
                TokenKind::DictOpen,
                TokenKind::Name,
                TokenKind::ArrayOpen,
                TokenKind::Integer,
                TokenKind::Real,
                TokenKind::String,
                TokenKind::String,
                TokenKind::Bool,
                TokenKind::Null,
                TokenKind::Word,
                TokenKind::ArrayClose,
                TokenKind::DictClose,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let toks = tokens(b"(a\\(b\\)c\\n\\101\\zz)");
        assert_eq!(toks[0].kind, TokenKind::String);
        assert_eq!(toks[0].value, b"a(b)c\nAzz");
    }

    #[test]
    fn string_balanced_parens() {
        let toks = tokens(b"(outer (inner) tail)");
        assert_eq!(toks[0].value, b"outer (inner) tail");
    }

    #[test]
    fn string_line_continuation() {
        let toks = tokens(b"(one\\\ntwo)");
        assert_eq!(toks[0].value, b"onetwo");
        let toks = tokens(b"(one\\\r\ntwo)");
        assert_eq!(toks[0].value, b"onetwo");
    }

    #[test]
    fn hex_string_odd_nibble() {
        let toks = tokens(b"<901FA>");
        assert_eq!(toks[0].value, b"\x90\x1F\xA0");
        let toks = tokens(b"<9 01F\nA>");
        assert_eq!(toks[0].value, b"\x90\x1F\xA0");
    }

    #[test]
    fn name_hex_escapes() {
        let toks = tokens(b"/A#20B#2fc");
        assert_eq!(toks[0].kind, TokenKind::Name);
        assert_eq!(toks[0].value, b"A B/c");
    }

    #[test]
    fn bad_name_escape() {
        let toks = tokens(b"/A#zq ");
        assert_eq!(toks[0].kind, TokenKind::Bad);
    }

    #[test]
    fn numbers() {
        let toks = tokens(b"+17 -3 .5 4. 1.2.3");
        assert_eq!(toks[0].kind, TokenKind::Integer);
        assert_eq!(toks[0].integer_value(), 17);
        assert_eq!(toks[1].integer_value(), -3);
        assert_eq!(toks[2].kind, TokenKind::Real);
        assert_eq!(toks[3].kind, TokenKind::Real);
        assert_eq!(toks[4].kind, TokenKind::Word, "two dots make a word");
    }

    #[test]
    fn comments_suppressed_by_default() {
        assert_eq!(
            kinds(b"1 % a comment\n2"),
            vec![TokenKind::Integer, TokenKind::Integer, TokenKind::Eof]
        );
    }

    #[test]
    fn ignorable_mode_emits_space_and_comment() {
        let mut source = MemorySource::new("test", b"1 %c\n2".to_vec());
        let mut tokenizer = Tokenizer::new().include_ignorable().allow_eof();
        let mut seen = Vec::new();
        loop {
            let token = tokenizer.read_token(&mut source, "test", true, 0).unwrap();
            if token.kind == TokenKind::Eof {
                break;
            }
            seen.push(token.kind);
        }
        assert_eq!(
            seen,
            vec![
                TokenKind::Integer,
                TokenKind::Space,
                TokenKind::Comment,
                TokenKind::Space,
                TokenKind::Integer,
            ]
        );
    }

    #[test]
    fn max_len_leaves_position_at_token_start() {
        let mut source = MemorySource::new("test", b"  verylongword".to_vec());
        let mut tokenizer = Tokenizer::new();
        let token = tokenizer.read_token(&mut source, "test", true, 4).unwrap();
        assert_eq!(token.kind, TokenKind::Bad);
        assert_eq!(token.error.as_deref(), Some("token too long"));
        assert_eq!(source.tell(), 2);
    }

    #[test]
    fn eof_without_allowance_is_bad() {
        let mut source = MemorySource::new("test", b"  ".to_vec());
        let mut tokenizer = Tokenizer::new();
        let token = tokenizer.read_token(&mut source, "test", true, 0).unwrap();
        assert_eq!(token.kind, TokenKind::Bad);
    }

    #[test]
    fn raw_preserves_source_spelling() {
        let toks = tokens(b"/A#42 (x\\tz)");
        assert_eq!(toks[0].raw, b"/A#42");
        assert_eq!(toks[0].value, b"AB");
        assert_eq!(toks[1].raw, b"(x\\tz)");
        assert_eq!(toks[1].value, b"x\tz");
    }

    #[test]
    fn inline_image_scan() {
        let mut source = MemorySource::new("test", b"\xde\xad\xbe\xefEI-ish EI Q".to_vec());
        let mut tokenizer = Tokenizer::new().allow_eof();
        tokenizer.expect_inline_image();
        let token = tokenizer.read_token(&mut source, "test", true, 0).unwrap();
        assert_eq!(token.kind, TokenKind::InlineImage);
        assert_eq!(token.value, b"\xde\xad\xbe\xefEI-ish");
        let next = tokenizer.read_token(&mut source, "test", true, 0).unwrap();
        assert!(next.is_word(b"Q"));
    }

    #[test]
    fn token_offsets() {
        let toks = tokens(b"  12 /N");
        assert_eq!(toks[0].offset, 2);
        assert_eq!(toks[1].offset, 5);
    }
}
