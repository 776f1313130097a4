use std::fmt;

use crate::ObjectId;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Hard failures. Structural damage that can be worked around is reported
/// through [`crate::Warning`]s instead and never unwinds.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A codec or pipeline refused to grow past its configured memory limit.
    #[error("memory limit of {limit} bytes exceeded in {context}")]
    MemoryLimit { context: &'static str, limit: usize },
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("cross-reference error: {0}")]
    Xref(#[from] XrefError),
    #[error("invalid or missing password")]
    InvalidPassword,
    #[error("decryption failed: {0}")]
    Decryption(#[from] DecryptionError),
    #[error("unsupported feature: {0}")]
    Unsupported(&'static str),
    #[error("object {} {} not found", .0.0, .0.1)]
    ObjectNotFound(ObjectId),
    #[error("dictionary has no /{0} entry")]
    DictKey(String),
    #[error("expected a {expected}, found a {found}")]
    ObjectType { expected: &'static str, found: &'static str },
    #[error("index {0} is out of range")]
    OutOfRange(usize),
    #[error("reference cycle detected resolving object {} {}", .0.0, .0.1)]
    ReferenceCycle(ObjectId),
    #[error("offset {0} is outside the document")]
    InvalidOffset(usize),
    #[error("invalid stream: {0}")]
    InvalidStream(String),
    #[error("stream is not filterable")]
    NotFilterable,
    /// Contract violation by the caller; never raised from parse paths.
    #[error("logic error: {0}")]
    Logic(&'static str),
    #[error("numeric conversion failed: {0}")]
    NumericCast(String),
    #[error("page {0} not found")]
    PageNumberNotFound(u32),
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid file header")]
    InvalidFileHeader,
    #[error("invalid trailer")]
    InvalidTrailer,
    #[error("invalid cross-reference section")]
    InvalidXref,
    #[error("indirect object at offset {offset} could not be parsed")]
    IndirectObject { offset: usize },
    #[error("object header does not match the expected id")]
    ObjectIdMismatch,
    #[error("unexpected end of input")]
    EndOfInput,
    #[error("bad token at offset {offset}: {message}")]
    BadToken { offset: u64, message: String },
    #[error("too many consecutive parse errors in one object")]
    TooManyErrors,
    #[error("invalid object stream: {0}")]
    InvalidObjectStream(&'static str),
}

#[derive(Debug, thiserror::Error)]
pub enum XrefError {
    #[error("startxref not found")]
    Start,
    #[error("previous cross-reference section offset is invalid")]
    PrevStart,
    #[error("hybrid cross-reference stream offset is invalid")]
    StreamStart,
    #[error("cross-reference stream is malformed: {0}")]
    Stream(&'static str),
    #[error("no entry for object")]
    MissingEntry,
}

#[derive(Debug, thiserror::Error)]
pub enum DecryptionError {
    #[error("the encryption dictionary is missing or invalid")]
    InvalidEncryptionDictionary,
    #[error("unsupported encryption revision {0}")]
    UnsupportedRevision(i64),
    #[error("unsupported encryption version {0}")]
    UnsupportedVersion(i64),
    #[error("invalid key length {0}")]
    InvalidKeyLength(usize),
    #[error("invalid crypt filter method")]
    InvalidCryptFilterMethod,
    #[error("missing encryption key")]
    MissingKey,
    #[error("ciphertext is too short or misaligned")]
    InvalidCipherText,
    #[error("document ID is missing from the trailer")]
    MissingDocumentId,
    #[error("password is not valid UTF-8")]
    InvalidPasswordEncoding,
}

impl Error {
    /// Rough mapping to the documented error taxonomy, used by callers that
    /// translate failures into process exit codes.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) | Error::MemoryLimit { .. } => ErrorKind::System,
            Error::Parse(_) | Error::Xref(_) | Error::InvalidOffset(_) | Error::InvalidStream(_) => {
                ErrorKind::DamagedPdf
            }
            Error::InvalidPassword | Error::Decryption(_) => ErrorKind::Password,
            Error::Unsupported(_) | Error::NotFilterable => ErrorKind::Unsupported,
            Error::ObjectNotFound(_)
            | Error::DictKey(_)
            | Error::ObjectType { .. }
            | Error::OutOfRange(_)
            | Error::ReferenceCycle(_)
            | Error::NumericCast(_)
            | Error::PageNumberNotFound(_) => ErrorKind::Object,
            Error::Logic(_) => ErrorKind::Logic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    System,
    DamagedPdf,
    Password,
    Unsupported,
    Object,
    Logic,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::System => "system",
            ErrorKind::DamagedPdf => "damaged pdf",
            ErrorKind::Password => "password",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Object => "object",
            ErrorKind::Logic => "logic",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(Error::InvalidPassword.kind(), ErrorKind::Password);
        assert_eq!(Error::Parse(ParseError::InvalidTrailer).kind(), ErrorKind::DamagedPdf);
        assert_eq!(
            Error::MemoryLimit { context: "flate", limit: 1 }.kind(),
            ErrorKind::System
        );
    }
}
