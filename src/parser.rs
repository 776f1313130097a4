//! Recursive-descent object parser over the tokeniser. Structural damage is
//! recovered where the format allows it: each recovery appends a warning and
//! substitutes a safe value, so one bad object never aborts a load.

use std::cell::{Cell, RefCell};
use std::io::SeekFrom;

use crate::object::{Dictionary, Object, ObjectId, Real, Stream, StringFormat};
use crate::source::{AcceptFirst, Source, find_first};
use crate::tokenizer::{Token, TokenKind, Tokenizer};
use crate::warnings::Warnings;
use crate::{Error, ParseError, Result};

/// Containers may nest at most this deep before the parser gives up on the
/// subtree and substitutes null.
pub const MAX_DEPTH: usize = 500;

/// Recoveries tolerated inside one object body before the parse aborts.
pub const MAX_OBJECT_ERRORS: usize = 6;

/// Resolves indirect references encountered while parsing (for `/Length`).
/// Never fails: unresolvable references come back as null after a warning.
pub trait Resolver {
    fn resolve(&self, id: ObjectId) -> Object;
}

/// A resolver that knows nothing. Supplies document context (so `N G R` is
/// recognised) where no object lookup is possible.
pub struct NullResolver;

impl Resolver for NullResolver {
    fn resolve(&self, _id: ObjectId) -> Object {
        Object::Null
    }
}

pub struct Parser<'a> {
    source: &'a mut dyn Source,
    tokenizer: Tokenizer,
    pushback: Vec<Token>,
    warnings: &'a RefCell<Warnings>,
    resolver: Option<&'a dyn Resolver>,
    fake_names: &'a Cell<u32>,
    /// Object id used in warning provenance, once known.
    current: Option<ObjectId>,
    /// Streams are banned inside object streams.
    allow_streams: bool,
    errors: usize,
    /// Absolute offset of the most recent literal-string `/Contents` value,
    /// kept for signature handling.
    contents_offset: Option<u64>,
}

impl<'a> Parser<'a> {
    pub fn new(
        source: &'a mut dyn Source, warnings: &'a RefCell<Warnings>, resolver: Option<&'a dyn Resolver>,
        fake_names: &'a Cell<u32>,
    ) -> Parser<'a> {
        Parser {
            source,
            tokenizer: Tokenizer::new().allow_eof(),
            pushback: Vec::new(),
            warnings,
            resolver,
            fake_names,
            current: None,
            allow_streams: true,
            errors: 0,
            contents_offset: None,
        }
    }

    pub fn forbid_streams(mut self) -> Self {
        self.allow_streams = false;
        self
    }

    pub fn contents_offset(&self) -> Option<u64> {
        self.contents_offset
    }

    fn warn(&mut self, offset: Option<u64>, message: impl Into<String>) {
        self.warnings.borrow_mut().push(self.current, offset, message);
    }

    fn recover(&mut self, offset: Option<u64>, message: impl Into<String>) -> Result<()> {
        self.warn(offset, message);
        self.errors += 1;
        if self.errors >= MAX_OBJECT_ERRORS {
            self.warn(offset, "too many errors; giving up on this object");
            return Err(Error::Parse(ParseError::TooManyErrors));
        }
        Ok(())
    }

    fn next(&mut self) -> Result<Token> {
        match self.pushback.pop() {
            Some(token) => Ok(token),
            None => self.tokenizer.read_token(self.source, "object parser", true, 0),
        }
    }

    fn unread(&mut self, token: Token) {
        self.pushback.push(token);
    }

    /// Parse one object starting at the current position.
    pub fn parse_object(&mut self) -> Result<Object> {
        self.errors = 0;
        self.parse_value(0)
    }

    /// Seek to `offset` and parse an `N G obj ... endobj` body. A missing
    /// `endobj` and a header/expectation mismatch are warnings.
    pub fn parse_indirect_object(
        &mut self, offset: u64, expected: Option<ObjectId>,
    ) -> Result<(ObjectId, Object)> {
        self.source.seek(SeekFrom::Start(offset))?;
        self.pushback.clear();
        self.errors = 0;

        let id = self.parse_object_header(offset)?;
        if let Some(expected) = expected {
            if id.0 != expected.0 {
                return Err(Error::Parse(ParseError::ObjectIdMismatch));
            }
            if id.1 != expected.1 {
                // The header wins over the xref generation.
                self.warn(
                    Some(offset),
                    format!("expected generation {}, object header has {}", expected.1, id.1),
                );
            }
        }
        self.current = Some(id);

        let object = self.parse_value(0)?;
        let token = self.next()?;
        if !token.is_word(b"endobj") {
            self.warn(Some(token.offset), "expected endobj");
            self.unread(token);
        }
        let id = (id.0, id.1);
        self.current = None;
        Ok((id, object))
    }

    fn parse_object_header(&mut self, offset: u64) -> Result<ObjectId> {
        let id = self.next()?;
        let r#gen = self.next()?;
        let keyword = self.next()?;
        if id.kind != TokenKind::Integer || r#gen.kind != TokenKind::Integer || !keyword.is_word(b"obj") {
            return Err(Error::Parse(ParseError::IndirectObject { offset: offset as usize }));
        }
        let id_value = u32::try_from(id.integer_value())
            .map_err(|_| Error::Parse(ParseError::IndirectObject { offset: offset as usize }))?;
        let gen_value = u16::try_from(r#gen.integer_value())
            .map_err(|_| Error::Parse(ParseError::IndirectObject { offset: offset as usize }))?;
        Ok((id_value, gen_value))
    }

    fn parse_value(&mut self, depth: usize) -> Result<Object> {
        loop {
            let token = self.next()?;
            let offset = token.offset;
            return match token.kind {
                TokenKind::Null => Ok(Object::Null),
                TokenKind::Bool => Ok(Object::Boolean(token.bool_value())),
                TokenKind::Integer => self.parse_number_or_reference(token),
                TokenKind::Real => {
                    match Real::parse(std::str::from_utf8(&token.value).unwrap_or("")) {
                        Some(real) => Ok(Object::Real(real)),
                        None => {
                            self.recover(Some(offset), "malformed real number")?;
                            Ok(Object::Null)
                        }
                    }
                }
                TokenKind::Name => Ok(Object::Name(token.value)),
                TokenKind::String => {
                    let format = if token.raw.first() == Some(&b'<') {
                        StringFormat::Hexadecimal
                    } else {
                        StringFormat::Literal
                    };
                    Ok(Object::String(token.value, format))
                }
                TokenKind::ArrayOpen => {
                    if depth >= MAX_DEPTH {
                        self.warn(Some(offset), "nesting too deep, treating array as null");
                        self.skip_balanced(TokenKind::ArrayClose)?;
                        return Ok(Object::Null);
                    }
                    self.parse_array(depth + 1)
                }
                TokenKind::DictOpen => {
                    if depth >= MAX_DEPTH {
                        self.warn(Some(offset), "nesting too deep, treating dictionary as null");
                        self.skip_balanced(TokenKind::DictClose)?;
                        return Ok(Object::Null);
                    }
                    let dict = self.parse_dictionary(depth + 1)?;
                    // Only a top-level dictionary can begin a stream.
                    if depth == 0 {
                        self.parse_possible_stream(dict)
                    } else {
                        Ok(Object::Dictionary(dict))
                    }
                }
                TokenKind::BraceOpen | TokenKind::BraceClose => {
                    // Braces only mean something inside content streams.
                    self.recover(Some(offset), "treating brace token as null")?;
                    Ok(Object::Null)
                }
                TokenKind::Word => {
                    self.recover(
                        Some(offset),
                        format!("unexpected word {:?}, treating as null", String::from_utf8_lossy(&token.value)),
                    )?;
                    Ok(Object::Null)
                }
                TokenKind::Bad => {
                    self.recover(
                        Some(offset),
                        format!("bad token: {}", token.error.as_deref().unwrap_or("unknown")),
                    )?;
                    Ok(Object::Null)
                }
                TokenKind::ArrayClose | TokenKind::DictClose => {
                    self.recover(Some(offset), "unexpected closing token, treating as null")?;
                    Ok(Object::Null)
                }
                TokenKind::Eof => Err(Error::Parse(ParseError::EndOfInput)),
                TokenKind::Space | TokenKind::Comment => continue,
                TokenKind::InlineImage => {
                    self.recover(Some(offset), "inline image outside content stream")?;
                    Ok(Object::Null)
                }
            };
        }
    }

    /// `N G R` is a reference when both numbers fit and a resolver context
    /// exists; otherwise the tokens are reported and left to be read back
    /// individually.
    fn parse_number_or_reference(&mut self, first: Token) -> Result<Object> {
        let second = self.next()?;
        if second.kind == TokenKind::Integer {
            let third = self.next()?;
            if third.is_word(b"R") {
                let id = u32::try_from(first.integer_value());
                let r#gen = u16::try_from(second.integer_value());
                if let (Ok(id), Ok(r#gen)) = (id, r#gen) {
                    if self.resolver.is_some() {
                        return Ok(Object::Reference((id, r#gen)));
                    }
                    self.warn(
                        Some(first.offset),
                        "indirect reference without a document context, leaving tokens in place",
                    );
                } else {
                    self.warn(Some(first.offset), "indirect reference out of range");
                }
            }
            self.unread(third);
        }
        self.unread(second);
        Ok(Object::Integer(first.integer_value()))
    }

    fn parse_array(&mut self, depth: usize) -> Result<Object> {
        let mut items = Vec::new();
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::ArrayClose => return Ok(Object::Array(items)),
                TokenKind::Eof => {
                    self.warn(Some(token.offset), "unterminated array");
                    return Ok(Object::Array(items));
                }
                _ => {
                    self.unread(token);
                    items.push(self.parse_value(depth)?);
                }
            }
        }
    }

    fn parse_dictionary(&mut self, depth: usize) -> Result<Dictionary> {
        let mut dict = Dictionary::new();
        loop {
            let token = self.next()?;
            let key = match token.kind {
                TokenKind::DictClose => return Ok(dict),
                TokenKind::Eof => {
                    self.warn(Some(token.offset), "unterminated dictionary");
                    return Ok(dict);
                }
                TokenKind::Name => token.value,
                _ => {
                    // Consume the offending object in key position and hang
                    // it off a synthetic key.
                    let offset = token.offset;
                    self.unread(token);
                    let _ = self.parse_value(depth)?;
                    self.recover(Some(offset), "dictionary key is not a name, substituting a synthetic key")?;
                    let n = self.fake_names.get();
                    self.fake_names.set(n + 1);
                    format!("QPDFFake{n}").into_bytes()
                }
            };
            let token = self.next()?;
            if token.kind == TokenKind::DictClose {
                self.warn(
                    Some(token.offset),
                    format!(
                        "dictionary ended with key /{} and no value, treating value as null",
                        String::from_utf8_lossy(&key)
                    ),
                );
                dict.set(key, Object::Null);
                return Ok(dict);
            }
            let value_offset = token.offset;
            let value_is_literal_string =
                token.kind == TokenKind::String && token.raw.first() == Some(&b'(');
            self.unread(token);
            let value = self.parse_value(depth)?;
            if key == b"Contents" && value_is_literal_string {
                self.contents_offset = Some(value_offset);
            }
            if dict.has(&key) {
                self.warn(
                    Some(value_offset),
                    format!("duplicate dictionary key /{}, last wins", String::from_utf8_lossy(&key)),
                );
            }
            dict.set(key, value);
        }
    }

    fn skip_balanced(&mut self, until: TokenKind) -> Result<()> {
        let mut depth = 0usize;
        loop {
            let token = self.next()?;
            match token.kind {
                TokenKind::ArrayOpen | TokenKind::DictOpen => depth += 1,
                kind if kind == until && depth == 0 => return Ok(()),
                TokenKind::ArrayClose | TokenKind::DictClose => depth = depth.saturating_sub(1),
                TokenKind::Eof => return Ok(()),
                _ => {}
            }
        }
    }

    /// After a top-level dictionary, a `stream` keyword starts a stream body.
    fn parse_possible_stream(&mut self, dict: Dictionary) -> Result<Object> {
        let token = self.next()?;
        if !token.is_word(b"stream") {
            self.unread(token);
            return Ok(Object::Dictionary(dict));
        }
        if !self.allow_streams {
            self.warn(Some(token.offset), "stream object is not allowed here, treating as null");
            return Ok(Object::Null);
        }
        self.pushback.clear();
        self.skip_stream_eol()?;
        let data_start = self.source.tell();

        let length = self.resolve_length(&dict);
        let file_len = self.source.seek(SeekFrom::End(0))?;
        self.source.seek(SeekFrom::Start(data_start))?;

        let mut stream = match length {
            Some(length) => {
                let length = if data_start + length as u64 > file_len {
                    self.warn(
                        Some(data_start),
                        "stream extends past the end of the file, truncating",
                    );
                    (file_len - data_start) as usize
                } else {
                    length
                };
                let mut data = vec![0u8; length];
                let got = read_exact(self.source, &mut data)?;
                data.truncate(got);
                if self.expect_endstream()? {
                    Some(data)
                } else {
                    // /Length did not land on endstream; rescan.
                    None
                }
            }
            None => None,
        };

        if stream.is_none() {
            self.warn(
                Some(data_start),
                "stream length is missing or wrong, recovering by scanning for endstream",
            );
            stream = self.scan_for_endstream(data_start)?;
        }

        match stream {
            Some(data) => {
                let mut stream = Stream::new(dict, data);
                stream.start_position = Some(data_start as usize);
                Ok(Object::Stream(stream))
            }
            None => {
                self.warn(Some(data_start), "unterminated stream, treating object as null");
                Ok(Object::Null)
            }
        }
    }

    /// Exactly one EOL follows the `stream` keyword: LF or CRLF. A bare CR is
    /// accepted with a warning.
    fn skip_stream_eol(&mut self) -> Result<()> {
        let mut byte = [0u8; 1];
        let at = self.source.tell();
        if self.source.read(&mut byte)? == 0 {
            return Ok(());
        }
        match byte[0] {
            b'\n' => Ok(()),
            b'\r' => {
                let next = self.source.tell();
                if self.source.read(&mut byte)? == 1 && byte[0] == b'\n' {
                    return Ok(());
                }
                self.source.seek(SeekFrom::Start(next))?;
                self.warn(Some(at), "carriage return alone after stream keyword");
                Ok(())
            }
            _ => {
                self.source.seek(SeekFrom::Start(at))?;
                self.warn(Some(at), "missing end of line after stream keyword");
                Ok(())
            }
        }
    }

    fn resolve_length(&mut self, dict: &Dictionary) -> Option<usize> {
        let length = dict.opt(b"Length")?;
        let value = match length {
            Object::Reference(id) => {
                let id = *id;
                self.resolver.as_ref().map(|r| r.resolve(id))?
            }
            other => other.clone(),
        };
        match value.as_i64() {
            Ok(n) if n >= 0 => Some(n as usize),
            _ => None,
        }
    }

    fn expect_endstream(&mut self) -> Result<bool> {
        let at = self.source.tell();
        // Up to one EOL may precede the keyword.
        let mut byte = [0u8; 1];
        if self.source.read(&mut byte)? == 1 {
            match byte[0] {
                b'\n' => {}
                b'\r' => {
                    let next = self.source.tell();
                    if self.source.read(&mut byte)? == 1 && byte[0] != b'\n' {
                        self.source.seek(SeekFrom::Start(next))?;
                    }
                }
                _ => {
                    self.source.seek(SeekFrom::Start(at))?;
                }
            }
        }
        let token = self.tokenizer.read_token(self.source, "stream", true, 0)?;
        if token.is_word(b"endstream") {
            Ok(true)
        } else {
            self.source.seek(SeekFrom::Start(at))?;
            Ok(false)
        }
    }

    fn scan_for_endstream(&mut self, data_start: u64) -> Result<Option<Vec<u8>>> {
        if !find_first(self.source, b"endstream", data_start, 0, &mut AcceptFirst)? {
            return Ok(None);
        }
        let keyword_at = self.source.tell();
        let mut length = (keyword_at - data_start) as usize;
        // The EOL before endstream belongs to the file syntax, not the data.
        let mut data = vec![0u8; length];
        self.source.seek(SeekFrom::Start(data_start))?;
        let got = read_exact(self.source, &mut data)?;
        data.truncate(got);
        if data.ends_with(b"\r\n") {
            length -= 2;
        } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
            length -= 1;
        }
        data.truncate(length);
        self.source.seek(SeekFrom::Start(keyword_at))?;
        let _ = self.tokenizer.read_token(self.source, "stream", true, 0)?;
        Ok(Some(data))
    }
}

fn read_exact(source: &mut dyn Source, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn parse(input: &[u8]) -> (Object, Warnings) {
        let mut source = MemorySource::new("test", input.to_vec());
        let warnings = RefCell::new(Warnings::new("test".into()));
        let fake_names = Cell::new(0);
        let resolver = NullResolver;
        let object = {
            let mut parser = Parser::new(&mut source, &warnings, Some(&resolver), &fake_names);
            parser.parse_object().unwrap()
        };
        (object, warnings.into_inner())
    }

    #[test]
    fn scalars() {
        assert_eq!(parse(b"null ").0, Object::Null);
        assert_eq!(parse(b"true ").0, Object::Boolean(true));
        assert_eq!(parse(b"-42 ").0, Object::Integer(-42));
        assert_eq!(parse(b"/Name ").0, Object::name("Name"));
        assert_eq!(parse(b"3.14 ").0, Object::Real(Real::parse("3.14").unwrap()));
    }

    #[test]
    fn references_and_plain_integers() {
        assert_eq!(parse(b"12 0 R ").0, Object::Reference((12, 0)));
        let (object, _) = parse(b"[1 2 3] ");
        assert_eq!(
            object,
            Object::Array(vec![Object::Integer(1), Object::Integer(2), Object::Integer(3)])
        );
        let (object, _) = parse(b"[1 2 R 3] ");
        assert_eq!(object, Object::Array(vec![Object::Reference((1, 2)), Object::Integer(3)]));
    }

    #[test]
    fn nested_containers() {
        let (object, warnings) = parse(b"<< /A [1 << /B true >>] /C (s) >> ");
        assert!(warnings.is_empty());
        let dict = object.as_dict().unwrap();
        assert_eq!(dict.get(b"C").unwrap().as_str().unwrap(), b"s");
        let array = dict.get(b"A").unwrap().as_array().unwrap();
        assert_eq!(array.len(), 2);
    }

    #[test]
    fn odd_dictionary_drops_to_null() {
        let (object, warnings) = parse(b"<< /A 1 /B >> ");
        let dict = object.as_dict().unwrap();
        assert_eq!(dict.get(b"B").unwrap(), &Object::Null);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn non_name_key_gets_fake_name() {
        let (object, warnings) = parse(b"<< 3 (value) /B 1 >> ");
        let dict = object.as_dict().unwrap();
        assert_eq!(dict.get(b"QPDFFake0").unwrap().as_str().unwrap(), b"value");
        assert_eq!(dict.get(b"B").unwrap().as_i64().unwrap(), 1);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn duplicate_key_last_wins() {
        let (object, warnings) = parse(b"<< /A 1 /A 2 >> ");
        assert_eq!(object.as_dict().unwrap().get(b"A").unwrap().as_i64().unwrap(), 2);
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn braces_become_null() {
        let (object, warnings) = parse(b"[ { } 1 ] ");
        assert_eq!(
            object,
            Object::Array(vec![Object::Null, Object::Null, Object::Integer(1)])
        );
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn depth_limit_substitutes_null() {
        let mut input = Vec::new();
        for _ in 0..(MAX_DEPTH + 10) {
            input.push(b'[');
        }
        for _ in 0..(MAX_DEPTH + 10) {
            input.push(b']');
        }
        input.push(b' ');
        let (object, warnings) = parse(&input);
        assert!(matches!(object, Object::Array(_)));
        assert!(!warnings.is_empty());
    }

    #[test]
    fn stream_with_explicit_length() {
        let input = b"1 0 obj << /Length 5 >> stream\nhello\nendstream endobj";
        let mut source = MemorySource::new("test", input.to_vec());
        let warnings = RefCell::new(Warnings::new("test".into()));
        let fake_names = Cell::new(0);
        let resolver = NullResolver;
        let mut parser = Parser::new(&mut source, &warnings, Some(&resolver), &fake_names);
        let (id, object) = parser.parse_indirect_object(0, None).unwrap();
        assert_eq!(id, (1, 0));
        let stream = object.as_stream().unwrap();
        assert_eq!(stream.content().unwrap(), b"hello");
        assert!(warnings.borrow().is_empty());
    }

    #[test]
    fn stream_with_wrong_length_rescans() {
        let input = b"1 0 obj << /Length 2 >> stream\nhello world\nendstream endobj";
        let mut source = MemorySource::new("test", input.to_vec());
        let warnings = RefCell::new(Warnings::new("test".into()));
        let fake_names = Cell::new(0);
        let resolver = NullResolver;
        let mut parser = Parser::new(&mut source, &warnings, Some(&resolver), &fake_names);
        let (_, object) = parser.parse_indirect_object(0, None).unwrap();
        assert_eq!(object.as_stream().unwrap().content().unwrap(), b"hello world");
        assert!(!warnings.borrow().is_empty());
    }

    #[test]
    fn stream_banned_in_object_streams() {
        let input = b"<< /Length 2 >> stream\nhi\nendstream ";
        let mut source = MemorySource::new("test", input.to_vec());
        let warnings = RefCell::new(Warnings::new("test".into()));
        let fake_names = Cell::new(0);
        let mut parser = Parser::new(&mut source, &warnings, None, &fake_names).forbid_streams();
        let object = parser.parse_object().unwrap();
        assert_eq!(object, Object::Null);
        assert_eq!(warnings.borrow().len(), 1);
    }

    #[test]
    fn missing_endobj_warns() {
        let input = b"4 1 obj 17 5 0 obj";
        let mut source = MemorySource::new("test", input.to_vec());
        let warnings = RefCell::new(Warnings::new("test".into()));
        let fake_names = Cell::new(0);
        let mut parser = Parser::new(&mut source, &warnings, None, &fake_names);
        let (id, object) = parser.parse_indirect_object(0, None).unwrap();
        assert_eq!(id, (4, 1));
        assert_eq!(object.as_i64().unwrap(), 17);
        assert_eq!(warnings.borrow().len(), 1);
    }

    #[test]
    fn too_many_errors_aborts() {
        let mut source = MemorySource::new("test", b"[ } } } } } } } 1 ] ".to_vec());
        let warnings = RefCell::new(Warnings::new("test".into()));
        let fake_names = Cell::new(0);
        let mut parser = Parser::new(&mut source, &warnings, None, &fake_names);
        assert!(matches!(
            parser.parse_object(),
            Err(Error::Parse(ParseError::TooManyErrors))
        ));
    }

    #[test]
    fn contents_offset_captured() {
        let input = b"<< /Type /Sig /Contents (ABCD) >> ";
        let mut source = MemorySource::new("test", input.to_vec());
        let warnings = RefCell::new(Warnings::new("test".into()));
        let fake_names = Cell::new(0);
        let mut parser = Parser::new(&mut source, &warnings, None, &fake_names);
        parser.parse_object().unwrap();
        assert_eq!(parser.contents_offset(), Some(24));
    }
}
