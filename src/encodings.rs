//! Text string codecs. PDF text strings are UTF-16BE when they carry the BOM,
//! otherwise PDFDocEncoding, which matches Latin-1 outside two small ranges.

use encoding_rs::UTF_16BE;

/// Code points for PDFDocEncoding bytes 0x18..=0x1F (breakpoint/ligature
/// accents) and 0x80..=0x9F, where the encoding departs from Latin-1.
const PDF_DOC_LOW: [char; 8] = ['\u{02D8}', '\u{02C7}', '\u{02C6}', '\u{02D9}', '\u{02DD}', '\u{02DB}', '\u{02DA}', '\u{02DC}'];
const PDF_DOC_HIGH: [char; 32] = [
    '\u{2022}', '\u{2020}', '\u{2021}', '\u{2026}', '\u{2014}', '\u{2013}', '\u{0192}', '\u{2044}',
    '\u{2039}', '\u{203A}', '\u{2212}', '\u{2030}', '\u{201E}', '\u{201C}', '\u{201D}', '\u{2018}',
    '\u{2019}', '\u{201A}', '\u{2122}', '\u{FB01}', '\u{FB02}', '\u{0141}', '\u{0152}', '\u{0160}',
    '\u{0178}', '\u{017D}', '\u{0131}', '\u{0142}', '\u{0153}', '\u{0161}', '\u{017E}', '\u{FFFD}',
];

/// Decode a text string to UTF-8.
pub fn bytes_to_string(bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFE, 0xFF]) {
        let (text, _, _) = UTF_16BE.decode(&bytes[2..]);
        return text.into_owned();
    }
    bytes
        .iter()
        .map(|&b| match b {
            0x18..=0x1F => PDF_DOC_LOW[(b - 0x18) as usize],
            0x80..=0x9F => PDF_DOC_HIGH[(b - 0x80) as usize],
            0xAD => '\u{FFFD}',
            other => other as char,
        })
        .collect()
}

/// Encode UTF-8 text as a PDF text string: PDFDocEncoding when every character
/// fits, otherwise UTF-16BE with the BOM.
pub fn string_to_bytes(text: &str) -> Vec<u8> {
    if let Some(encoded) = try_pdf_doc_encode(text) {
        return encoded;
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes
}

fn try_pdf_doc_encode(text: &str) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(text.len());
    for c in text.chars() {
        let b = match c {
            '\u{00}'..='\u{17}' => c as u8,
            '\u{20}'..='\u{7E}' => c as u8,
            '\u{A0}'..='\u{FF}' if c != '\u{AD}' => c as u8,
            _ => {
                let low = PDF_DOC_LOW.iter().position(|&p| p == c).map(|i| 0x18 + i as u8);
                let high = PDF_DOC_HIGH.iter().position(|&p| p == c).map(|i| 0x80 + i as u8);
                low.or(high)?
            }
        };
        bytes.push(b);
    }
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utf16_round_trip() {
        let text = "čaj ☕";
        let bytes = string_to_bytes(text);
        assert!(bytes.starts_with(&[0xFE, 0xFF]));
        assert_eq!(bytes_to_string(&bytes), text);
    }

    #[test]
    fn pdf_doc_round_trip() {
        let text = "dash – bullet •";
        let bytes = string_to_bytes(text);
        assert!(!bytes.starts_with(&[0xFE, 0xFF]));
        assert_eq!(bytes_to_string(&bytes), text);
    }

    #[test]
    fn ascii_stays_ascii() {
        assert_eq!(string_to_bytes("Hello"), b"Hello");
        assert_eq!(bytes_to_string(b"Hello"), "Hello");
    }
}
