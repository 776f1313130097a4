//! Content-stream parsing: operator/operand sequences and inline images.
//! Content syntax is forgiving and self-contained, so it is parsed with
//! combinators instead of the document object parser.

use std::str::{self, FromStr};

use nom::branch::alt;
use nom::bytes::complete::{tag, take, take_while, take_while1, take_while_m_n};
use nom::character::complete::{digit0, digit1, one_of};
use nom::combinator::{cut, map, map_opt, map_res, opt, recognize};
use nom::error::ErrorKind;
use nom::multi::{fold_many0, many0};
use nom::sequence::{delimited, pair, preceded, terminated};
use nom::{AsChar, IResult, Input, Parser};
use nom_locate::LocatedSpan;

use crate::object::{Dictionary, Object, Real, Stream, StringFormat};
use crate::{Error, ParseError, Result};

pub(crate) type ParserInput<'a> = LocatedSpan<&'a [u8], &'a str>;
pub(crate) type NomError<'a> = nom::error::Error<ParserInput<'a>>;
pub(crate) type NomResult<'a, O, E = NomError<'a>> = IResult<ParserInput<'a>, O, E>;

/// Maximum nesting of literal string parentheses.
const MAX_BRACKET: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub operator: String,
    pub operands: Vec<Object>,
}

impl Operation {
    pub fn new(operator: &str, operands: Vec<Object>) -> Operation {
        Operation {
            operator: operator.to_string(),
            operands,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Content {
    pub operations: Vec<Operation>,
}

impl Content {
    /// Parse decoded content-stream bytes. Returns an error only when nothing
    /// could be made of the input at all.
    pub fn parse(data: &[u8]) -> Result<Content> {
        let input = LocatedSpan::new_extra(data, "content");
        match _content(input) {
            Ok((_, content)) => Ok(content),
            Err(_) => Err(Error::Parse(ParseError::EndOfInput)),
        }
    }

    /// Serialise back to content-stream bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for operation in &self.operations {
            if operation.operator == "BI" {
                encode_inline_image(&mut out, operation)?;
                continue;
            }
            for operand in &operation.operands {
                crate::writer::write_object_to(&mut out, operand)?;
                out.push(b' ');
            }
            out.extend_from_slice(operation.operator.as_bytes());
            out.push(b'\n');
        }
        Ok(out)
    }
}

fn encode_inline_image(out: &mut Vec<u8>, operation: &Operation) -> Result<()> {
    let stream = operation
        .operands
        .first()
        .ok_or(Error::Logic("BI operation without image stream"))?
        .as_stream()?;
    out.extend_from_slice(b"BI");
    for (key, value) in stream.dict.iter() {
        out.push(b' ');
        out.push(b'/');
        out.extend_from_slice(key);
        out.push(b' ');
        crate::writer::write_object_to(out, value)?;
    }
    out.extend_from_slice(b" ID ");
    out.extend_from_slice(stream.content()?);
    out.extend_from_slice(b" EI\n");
    Ok(())
}

pub(crate) fn eol(input: ParserInput) -> NomResult<ParserInput> {
    alt((tag(&b"\r\n"[..]), tag(&b"\n"[..]), tag(&b"\r"[..]))).parse(input)
}

fn comment(input: ParserInput) -> NomResult<()> {
    map((tag(&b"%"[..]), take_while(|c: u8| !b"\r\n".contains(&c)), eol), |_| ()).parse(input)
}

#[inline]
fn is_whitespace(c: u8) -> bool {
    b" \t\n\r\0\x0C".contains(&c)
}

#[inline]
fn is_delimiter(c: u8) -> bool {
    b"()<>[]{}/%".contains(&c)
}

#[inline]
fn is_regular(c: u8) -> bool {
    !is_whitespace(c) && !is_delimiter(c)
}

#[inline]
fn is_direct_literal_string(c: u8) -> bool {
    !b"()\\\r\n".contains(&c)
}

fn white_space(input: ParserInput) -> NomResult<()> {
    map(take_while(is_whitespace), |_| ()).parse(input)
}

fn space(input: ParserInput) -> NomResult<()> {
    fold_many0(
        alt((map(take_while1(is_whitespace), |_| ()), comment)),
        || {},
        |_, _| (),
    ).parse(input)
}

fn integer(input: ParserInput) -> NomResult<i64> {
    map_res(
        recognize(pair(opt(one_of("+-")), digit1)),
        |text: ParserInput| {
            let text = str::from_utf8(&text).map_err(|_| ())?;
            i64::from_str(text.strip_prefix('+').unwrap_or(text)).map_err(|_| ())
        },
    ).parse(input)
}

fn real(input: ParserInput) -> NomResult<Real> {
    map_opt(
        recognize(pair(
            opt(one_of("+-")),
            alt((
                map((digit1, tag(&b"."[..]), digit0), |_| ()),
                map(pair(tag(&b"."[..]), digit1), |_| ()),
            )),
        )),
        |text: ParserInput| str::from_utf8(&text).ok().and_then(Real::parse),
    ).parse(input)
}

fn hex_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        take_while_m_n(2, 2, |c: u8| c.is_hex_digit()),
        |x: ParserInput| u8::from_str_radix(str::from_utf8(&x).unwrap(), 16),
    ).parse(input)
}

fn oct_char(input: ParserInput) -> NomResult<u8> {
    map_res(
        take_while_m_n(1, 3, |c: u8| c.is_oct_digit()),
        // Overflow is ignored per spec.
        |x: ParserInput| u16::from_str_radix(str::from_utf8(&x).unwrap(), 8).map(|o| o as u8),
    ).parse(input)
}

pub(crate) fn name(input: ParserInput) -> NomResult<Vec<u8>> {
    preceded(
        tag(&b"/"[..]),
        many0(alt((
            preceded(tag(&b"#"[..]), hex_char),
            map_opt(take(1usize), |c: ParserInput| {
                if c[0] != b'#' && is_regular(c[0]) {
                    Some(c[0])
                } else {
                    None
                }
            }),
        ))),
    ).parse(input)
}

fn escape_sequence(input: ParserInput) -> NomResult<Option<u8>> {
    preceded(
        tag(&b"\\"[..]),
        alt((
            map(oct_char, Some),
            map(eol, |_| None),
            map(tag(&b"n"[..]), |_| Some(b'\n')),
            map(tag(&b"r"[..]), |_| Some(b'\r')),
            map(tag(&b"t"[..]), |_| Some(b'\t')),
            map(tag(&b"b"[..]), |_| Some(b'\x08')),
            map(tag(&b"f"[..]), |_| Some(b'\x0C')),
            map(take(1usize), |c: ParserInput| Some(c[0])),
        )),
    ).parse(input)
}

enum StringFragment<'a> {
    Direct(ParserInput<'a>),
    Escape(Option<u8>),
    Eol(ParserInput<'a>),
    Nested(Vec<u8>),
}

impl StringFragment<'_> {
    fn push(&self, output: &mut Vec<u8>) {
        match self {
            StringFragment::Direct(s) | StringFragment::Eol(s) => output.extend_from_slice(s),
            StringFragment::Escape(e) => output.extend(e),
            StringFragment::Nested(n) => output.extend_from_slice(n),
        }
    }
}

fn inner_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        fold_many0(
            alt((
                map(take_while1(is_direct_literal_string), StringFragment::Direct),
                map(escape_sequence, StringFragment::Escape),
                map(eol, StringFragment::Eol),
                map(nested_literal_string(depth), StringFragment::Nested),
            )),
            Vec::new,
            |mut out: Vec<u8>, fragment| {
                fragment.push(&mut out);
                out
            },
        ).parse(input)
    }
}

fn nested_literal_string(depth: usize) -> impl Fn(ParserInput) -> NomResult<Vec<u8>> {
    move |input| {
        if depth == 0 {
            Err(nom::Err::Error(nom::error::Error::new(input, ErrorKind::TooLarge)))
        } else {
            map(
                delimited(tag(&b"("[..]), inner_literal_string(depth - 1), tag(&b")"[..])),
                |mut content| {
                    content.insert(0, b'(');
                    content.push(b')');
                    content
                },
            ).parse(input)
        }
    }
}

fn literal_string(input: ParserInput) -> NomResult<Vec<u8>> {
    delimited(tag(&b"("[..]), inner_literal_string(MAX_BRACKET), tag(&b")"[..])).parse(input)
}

#[inline]
fn hex_digit(input: ParserInput) -> NomResult<u8> {
    map_opt(take(1usize), |c: ParserInput| {
        str::from_utf8(&c).ok().and_then(|c| u8::from_str_radix(c, 16).ok())
    }).parse(input)
}

fn hexadecimal_string(input: ParserInput) -> NomResult<Object> {
    map(
        delimited(
            tag(&b"<"[..]),
            terminated(
                fold_many0(
                    preceded(white_space, hex_digit),
                    || -> (Vec<u8>, bool) { (Vec::new(), false) },
                    |state, c| match state {
                        (mut out, false) => {
                            out.push(c << 4);
                            (out, true)
                        }
                        (mut out, true) => {
                            *out.last_mut().unwrap() |= c;
                            (out, false)
                        }
                    },
                ),
                white_space,
            ),
            tag(&b">"[..]),
        ),
        |(bytes, _)| Object::String(bytes, StringFormat::Hexadecimal),
    ).parse(input)
}

fn boolean(input: ParserInput) -> NomResult<Object> {
    alt((
        map(tag(&b"true"[..]), |_| Object::Boolean(true)),
        map(tag(&b"false"[..]), |_| Object::Boolean(false)),
    )).parse(input)
}

fn null(input: ParserInput) -> NomResult<Object> {
    map(tag(&b"null"[..]), |_| Object::Null).parse(input)
}

fn array(input: ParserInput) -> NomResult<Vec<Object>> {
    delimited(pair(tag(&b"["[..]), space), many0(operand), tag(&b"]"[..])).parse(input)
}

fn dictionary(input: ParserInput) -> NomResult<Dictionary> {
    delimited(pair(tag(&b"<<"[..]), space), inner_dictionary, tag(&b">>"[..])).parse(input)
}

fn inner_dictionary(input: ParserInput) -> NomResult<Dictionary> {
    fold_many0(
        pair(terminated(name, space), operand),
        Dictionary::new,
        |mut dict, (key, value)| {
            dict.set(key, value);
            dict
        },
    ).parse(input)
}

fn operator(input: ParserInput) -> NomResult<String> {
    map_res(
        take_while1(|c: u8| c.is_ascii_alphabetic() || b"*'\"".contains(&c)),
        |op: ParserInput| str::from_utf8(&op).map(Into::into),
    ).parse(input)
}

fn operand(input: ParserInput) -> NomResult<Object> {
    terminated(
        alt((
            null,
            boolean,
            map(real, Object::Real),
            map(integer, Object::Integer),
            map(name, Object::Name),
            map(literal_string, Object::string_literal),
            hexadecimal_string,
            map(array, Object::Array),
            map(dictionary, Object::Dictionary),
        )),
        space,
    ).parse(input)
}

fn operation(input: ParserInput) -> NomResult<Operation> {
    map(
        preceded(
            many0(comment),
            alt((inline_image, terminated(pair(many0(operand), operator), space))),
        ),
        |(operands, operator)| Operation { operator, operands },
    ).parse(input)
}

fn inline_image(input: ParserInput) -> NomResult<(Vec<Object>, String)> {
    preceded(pair(tag(&b"BI"[..]), space), cut(inline_image_impl)).parse(input)
}

fn inline_image_impl(input: ParserInput) -> NomResult<(Vec<Object>, String)> {
    let (input, dict) = inner_dictionary.parse(input)?;
    let (input, _) = pair(tag(&b"ID"[..]), take(1usize)).parse(input)?;
    let (input, data) = inline_image_data(input, &dict)?;
    let (input, _) = (space, tag(&b"EI"[..]), space).parse(input)?;
    let mut stream = Stream::new(dict, data);
    // Inline image dictionaries never carry /Length.
    stream.dict.remove(b"Length");
    Ok((input, (vec![Object::Stream(stream)], String::from("BI"))))
}

/// Unfiltered image data has a computable length; filtered data ends at the
/// whitespace-`EI` terminator.
fn inline_image_data<'a>(input: ParserInput<'a>, dict: &Dictionary) -> NomResult<'a, Vec<u8>> {
    let abbreviated = |short: &'static [u8], long: &'static [u8]| {
        dict.opt(short).or_else(|| dict.opt(long))
    };
    let has_filter = abbreviated(b"F", b"Filter").is_some();
    if !has_filter {
        let width = abbreviated(b"W", b"Width").and_then(|v| v.as_i64().ok());
        let height = abbreviated(b"H", b"Height").and_then(|v| v.as_i64().ok());
        let bpc = abbreviated(b"BPC", b"BitsPerComponent").and_then(|v| v.as_i64().ok()).unwrap_or(8);
        let components = match abbreviated(b"CS", b"ColorSpace").and_then(|v| v.as_name().ok()) {
            Some(b"DeviceRGB" | b"RGB" | b"CalRGB") => 3,
            Some(b"DeviceCMYK" | b"CMYK") => 4,
            _ => 1,
        };
        if let (Some(width), Some(height)) = (width, height) {
            let stride = (width as usize * components * bpc as usize).div_ceil(8);
            let length = stride * height as usize;
            return map(take(length), |data: ParserInput| data.to_vec()).parse(input);
        }
    }
    // Scan for the terminator the way the tokeniser does.
    let bytes: &[u8] = &input;
    let mut i = 0;
    while i + 3 <= bytes.len() {
        if is_whitespace(bytes[i])
            && bytes[i + 1] == b'E'
            && bytes[i + 2] == b'I'
            && bytes.get(i + 3).map(|&c| !is_regular(c)).unwrap_or(true)
        {
            let data = bytes[..i].to_vec();
            return Ok((input.take_from(i), data));
        }
        i += 1;
    }
    Err(nom::Err::Failure(nom::error::Error::new(input, ErrorKind::Eof)))
}

fn _content(input: ParserInput) -> NomResult<Content> {
    preceded(space, map(many0(operation), |operations| Content { operations })).parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_content() {
        let content = Content::parse(b"BT /F1 12 Tf 72 720 Td (Hello) Tj ET").unwrap();
        let operators: Vec<&str> = content.operations.iter().map(|op| op.operator.as_str()).collect();
        assert_eq!(operators, vec!["BT", "Tf", "Td", "Tj", "ET"]);
        assert_eq!(content.operations[3].operands[0].as_str().unwrap(), b"Hello");
    }

    #[test]
    fn reals_keep_their_text() {
        let content = Content::parse(b"0.500 0 0 0.500 0 0 cm").unwrap();
        match &content.operations[0].operands[0] {
            Object::Real(real) => assert_eq!(real.as_text(), "0.500"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn comments_are_skipped() {
        let content = Content::parse(b"% prologue\n1 0 0 1 0 0 cm % matrix\nq\n").unwrap();
        assert_eq!(content.operations.len(), 2);
    }

    #[test]
    fn round_trip_through_encode() {
        let original = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec![Object::name("F1"), Object::Integer(12)]),
                Operation::new("Tj", vec![Object::string_literal("Hi")]),
                Operation::new("ET", vec![]),
            ],
        };
        let encoded = original.encode().unwrap();
        let parsed = Content::parse(&encoded).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn inline_image_with_computed_length() {
        let data = b"BI /W 2 /H 2 /CS /RGB /BPC 8 ID \x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c EI Q";
        let content = Content::parse(data).unwrap();
        assert_eq!(content.operations[0].operator, "BI");
        let stream = content.operations[0].operands[0].as_stream().unwrap();
        assert_eq!(stream.content().unwrap().len(), 12);
        assert_eq!(content.operations[1].operator, "Q");
    }

    #[test]
    fn inline_image_with_filter_scans_for_terminator() {
        let data = b"BI /F /AHx ID 48656c6c6f> EI Q";
        let content = Content::parse(data).unwrap();
        let stream = content.operations[0].operands[0].as_stream().unwrap();
        assert_eq!(stream.content().unwrap(), b"48656c6c6f>");
    }
}
