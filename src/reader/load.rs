use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{LoadOptions, Reader};
use crate::{Document, Result};

impl Document {
    /// Load a PDF document from a specified file path.
    #[inline]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Document> {
        let name = path.as_ref().display().to_string();
        let file = File::open(path)?;
        let capacity = Some(file.metadata()?.len() as usize);
        Self::load_internal(name, file, capacity, LoadOptions::new())
    }

    /// Load a PDF document from a specified file path with a password for
    /// encrypted PDFs.
    #[inline]
    pub fn load_with_password<P: AsRef<Path>>(path: P, password: &str) -> Result<Document> {
        let options = LoadOptions {
            password: Some(password.to_string()),
            ..LoadOptions::new()
        };
        Self::load_with_options(path, options)
    }

    /// Load with explicit options (password, hex key, recovery behaviour).
    #[inline]
    pub fn load_with_options<P: AsRef<Path>>(path: P, options: LoadOptions) -> Result<Document> {
        let name = path.as_ref().display().to_string();
        let file = File::open(path)?;
        let capacity = Some(file.metadata()?.len() as usize);
        Self::load_internal(name, file, capacity, options)
    }

    /// Load a PDF document from an arbitrary source.
    #[inline]
    pub fn load_from<R: Read>(source: R) -> Result<Document> {
        Self::load_internal("<buffer>".to_string(), source, None, LoadOptions::new())
    }

    /// Load a PDF document from a memory slice.
    pub fn load_mem(buffer: &[u8]) -> Result<Document> {
        Reader::new("<memory>", buffer.to_vec(), LoadOptions::new()).read()
    }

    /// Load a PDF document from a memory slice with a password for encrypted
    /// PDFs.
    pub fn load_mem_with_password(buffer: &[u8], password: &str) -> Result<Document> {
        let options = LoadOptions {
            password: Some(password.to_string()),
            ..LoadOptions::new()
        };
        Reader::new("<memory>", buffer.to_vec(), options).read()
    }

    /// Load a PDF document from a memory slice with explicit options.
    pub fn load_mem_with_options(buffer: &[u8], options: LoadOptions) -> Result<Document> {
        Reader::new("<memory>", buffer.to_vec(), options).read()
    }

    fn load_internal<R: Read>(
        name: String, mut source: R, capacity: Option<usize>, options: LoadOptions,
    ) -> Result<Document> {
        let mut buffer = capacity.map(Vec::with_capacity).unwrap_or_default();
        source.read_to_end(&mut buffer)?;
        Reader::new(name, buffer, options).read()
    }
}

impl TryFrom<&[u8]> for Document {
    type Error = crate::Error;

    fn try_from(buffer: &[u8]) -> Result<Document> {
        Document::load_mem(buffer)
    }
}
