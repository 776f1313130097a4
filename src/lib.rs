//! A library for structural PDF transformation: parse a file into an object
//! graph, inspect or change it, and write it back out — preserving content
//! across repair, decryption, recompression, object-stream packing and
//! linearisation.
//!
//! ```no_run
//! use pdfmend::{Document, SaveOptions};
//!
//! # fn main() -> pdfmend::Result<()> {
//! let mut document = Document::load("input.pdf")?;
//! for warning in document.warnings.iter() {
//!     eprintln!("{warning}");
//! }
//! document.save_with_options("output.pdf", SaveOptions::default())?;
//! # Ok(())
//! # }
//! ```

pub mod content;
mod document;
mod encodings;
pub mod encryption;
mod error;
pub mod filters;
mod object;
mod object_stream;
mod parser;
mod pipeline;
pub mod qdf;
mod reader;
mod source;
mod token_filter;
mod tokenizer;
pub mod trees;
mod warnings;
mod writer;
mod xref;

pub use document::Document;
pub use encryption::{EncryptionRequest, EncryptionState, PasswordRole, Permissions};
pub use error::{DecryptionError, Error, ErrorKind, ParseError, Result, XrefError};
pub use filters::DecodeLevel;
pub use object::{
    Dictionary, Object, ObjectId, Real, Stream, StreamData, StreamProvider, StringFormat,
};
pub use object_stream::{ObjectStream, ObjectStreamBuilder};
pub use parser::{NullResolver, Parser, Resolver};
pub use pipeline::{BufferSink, CountingSink, NullSink, Sink, TeeSink, WriterSink};
pub use qdf::fix_qdf;
pub use reader::{LoadOptions, Reader};
pub use source::{FileSource, MemorySource, Source, Verifier, ViewSource, find_first, find_last};
pub use token_filter::{ContentNormalizer, PassThrough, TokenFilter, write_token};
pub use tokenizer::{Token, TokenKind, Tokenizer};
pub use warnings::{Provenance, Warning, Warnings};
pub use writer::{
    EncryptionMode, IdPolicy, ObjectStreamMode, SaveOptions, StreamDataMode,
};
pub use xref::{Xref, XrefEntry, XrefType};
