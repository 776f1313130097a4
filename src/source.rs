//! Seekable byte sources the tokeniser and repair scanner read from.
//!
//! A [`Source`] is either a whole in-memory buffer, an open file, or a
//! sub-range view over a shared buffer (used for object streams and the QDF
//! fixer). Pattern searches run in fixed windows so damaged files of any size
//! can be scanned without loading extra state.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use crate::{Error, Result};

/// Window size for [`find_first`] / [`find_last`] scans.
pub const FIND_WINDOW: usize = 1024;

pub trait Source {
    /// Name of the input, used in warning provenance.
    fn name(&self) -> &str;

    fn tell(&mut self) -> u64;

    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Read up to `buf.len()` bytes. Partial reads at EOF are permitted and
    /// return the short count; the position before the read is recorded and
    /// available through [`Source::last_offset`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Position of the most recent `read`.
    fn last_offset(&self) -> u64;

    fn rewind(&mut self) -> Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }

    /// Read up to `max` bytes or through the next end of line, whichever comes
    /// first. CR, LF and CRLF all terminate the line and are consumed but not
    /// returned.
    fn read_line(&mut self, max: usize) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        while line.len() < max {
            if self.read(&mut byte)? == 0 {
                break;
            }
            match byte[0] {
                b'\n' => break,
                b'\r' => {
                    let pos = self.tell();
                    if self.read(&mut byte)? == 1 && byte[0] != b'\n' {
                        self.seek(SeekFrom::Start(pos))?;
                    }
                    break;
                }
                c => line.push(c),
            }
        }
        Ok(line)
    }

    /// Skip forward past the next end-of-line sequence and return the offset
    /// of the first byte after it.
    fn find_and_skip_next_eol(&mut self) -> Result<u64> {
        let mut byte = [0u8; 1];
        loop {
            if self.read(&mut byte)? == 0 {
                return Ok(self.tell());
            }
            if byte[0] == b'\r' || byte[0] == b'\n' {
                break;
            }
        }
        loop {
            let pos = self.tell();
            if self.read(&mut byte)? == 0 {
                return Ok(pos);
            }
            if byte[0] != b'\r' && byte[0] != b'\n' {
                self.seek(SeekFrom::Start(pos))?;
                return Ok(pos);
            }
        }
    }
}

/// Confirms a candidate pattern match. The source is positioned at the match
/// when `check` runs; returning `true` accepts the match and leaves the source
/// wherever the verifier moved it.
pub trait Verifier {
    fn check(&mut self, source: &mut dyn Source) -> bool;
}

impl<F: FnMut(&mut dyn Source) -> bool> Verifier for F {
    fn check(&mut self, source: &mut dyn Source) -> bool {
        self(source)
    }
}

/// Accepts the first raw pattern hit unconditionally.
pub struct AcceptFirst;

impl Verifier for AcceptFirst {
    fn check(&mut self, _source: &mut dyn Source) -> bool {
        true
    }
}

fn check_pattern(pattern: &[u8]) -> Result<()> {
    if pattern.is_empty() || pattern.len() > FIND_WINDOW {
        return Err(Error::Logic("search pattern must be between 1 and 1024 bytes"));
    }
    Ok(())
}

/// Scan `[start, start + len)` (`len == 0` means to EOF) for `pattern`,
/// verifying each hit. On success the source is left where the verifier left
/// it; on failure its position is unspecified.
pub fn find_first(
    source: &mut dyn Source, pattern: &[u8], start: u64, len: u64, verifier: &mut dyn Verifier,
) -> Result<bool> {
    check_pattern(pattern)?;
    let end = if len == 0 { u64::MAX } else { start.saturating_add(len) };
    let mut window = vec![0u8; FIND_WINDOW];
    let mut window_start = start;
    loop {
        source.seek(SeekFrom::Start(window_start))?;
        let want = window.len().min((end - window_start).min(u64::MAX) as usize);
        let got = read_full(source, &mut window[..want])?;
        if got < pattern.len() {
            return Ok(false);
        }
        let mut search_from = 0;
        while let Some(found) = find_in(&window[search_from..got], pattern) {
            let candidate = window_start + (search_from + found) as u64;
            source.seek(SeekFrom::Start(candidate))?;
            if verifier.check(source) {
                return Ok(true);
            }
            search_from += found + 1;
        }
        if got < want {
            return Ok(false);
        }
        // Overlap by pattern length so hits straddling a window boundary are
        // still seen.
        window_start += (got - (pattern.len() - 1)) as u64;
        if window_start >= end {
            return Ok(false);
        }
    }
}

/// Like [`find_first`] but accepts the last verified hit in the range.
pub fn find_last(
    source: &mut dyn Source, pattern: &[u8], start: u64, len: u64, verifier: &mut dyn Verifier,
) -> Result<bool> {
    check_pattern(pattern)?;
    let end = if len == 0 { u64::MAX } else { start.saturating_add(len) };
    let mut window = vec![0u8; FIND_WINDOW];
    let mut window_start = start;
    let mut last_match: Option<u64> = None;
    loop {
        source.seek(SeekFrom::Start(window_start))?;
        let want = window.len().min((end - window_start).min(u64::MAX) as usize);
        let got = read_full(source, &mut window[..want])?;
        if got >= pattern.len() {
            let mut search_from = 0;
            while let Some(found) = find_in(&window[search_from..got], pattern) {
                let candidate = window_start + (search_from + found) as u64;
                source.seek(SeekFrom::Start(candidate))?;
                if verifier.check(source) {
                    last_match = Some(candidate);
                }
                search_from += found + 1;
            }
        }
        if got < want || got < pattern.len() {
            break;
        }
        window_start += (got - (pattern.len() - 1)) as u64;
        if window_start >= end {
            break;
        }
    }
    match last_match {
        Some(position) => {
            // Re-run the verifier so the source ends up where it left it.
            source.seek(SeekFrom::Start(position))?;
            Ok(verifier.check(source))
        }
        None => Ok(false),
    }
}

fn read_full(source: &mut dyn Source, buf: &mut [u8]) -> Result<usize> {
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

fn find_in(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// A whole in-memory buffer, shareable between the document and stream views.
pub struct MemorySource {
    name: String,
    data: Rc<Vec<u8>>,
    position: u64,
    last_offset: u64,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self::shared(name, Rc::new(data))
    }

    pub fn shared(name: impl Into<String>, data: Rc<Vec<u8>>) -> Self {
        MemorySource {
            name: name.into(),
            data,
            position: 0,
            last_offset: 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn share(&self) -> Rc<Vec<u8>> {
        Rc::clone(&self.data)
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn seek_to(len: u64, position: u64, pos: SeekFrom) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
        SeekFrom::Current(delta) => position.checked_add_signed(delta),
    };
    target.ok_or_else(|| Error::Logic("seek before start of source"))
}

impl Source for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tell(&mut self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = seek_to(self.data.len() as u64, self.position, pos)?;
        Ok(self.position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.last_offset = self.position;
        let available = self.data.len().saturating_sub(self.position as usize);
        let n = buf.len().min(available);
        let at = self.position as usize;
        buf[..n].copy_from_slice(&self.data[at..at + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn last_offset(&self) -> u64 {
        self.last_offset
    }
}

/// A sub-range view over a shared buffer. Offsets reported to callers are
/// relative to the view.
pub struct ViewSource {
    name: String,
    data: Rc<Vec<u8>>,
    start: usize,
    len: usize,
    position: u64,
    last_offset: u64,
}

impl ViewSource {
    pub fn new(name: impl Into<String>, data: Rc<Vec<u8>>, start: usize, len: usize) -> Self {
        let start = start.min(data.len());
        let len = len.min(data.len() - start);
        ViewSource {
            name: name.into(),
            data,
            start,
            len,
            position: 0,
            last_offset: 0,
        }
    }
}

impl Source for ViewSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tell(&mut self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = seek_to(self.len as u64, self.position, pos)?;
        Ok(self.position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.last_offset = self.position;
        let available = self.len.saturating_sub(self.position as usize);
        let n = buf.len().min(available);
        let at = self.start + self.position as usize;
        buf[..n].copy_from_slice(&self.data[at..at + n]);
        self.position += n as u64;
        Ok(n)
    }

    fn last_offset(&self) -> u64 {
        self.last_offset
    }
}

/// An open file read through a small internal buffer.
pub struct FileSource {
    name: String,
    file: File,
    position: u64,
    last_offset: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let name = path.as_ref().display().to_string();
        let file = File::open(path)?;
        Ok(FileSource {
            name,
            file,
            position: 0,
            last_offset: 0,
        })
    }
}

impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn tell(&mut self) -> u64 {
        self.position
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.position = self.file.seek(pos)?;
        Ok(self.position)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.last_offset = self.position;
        let n = self.file.read(buf)?;
        self.position += n as u64;
        Ok(n)
    }

    fn last_offset(&self) -> u64 {
        self.last_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_line_handles_all_eols() {
        let mut source = MemorySource::new("t", b"one\r\ntwo\rthree\nfour".to_vec());
        assert_eq!(source.read_line(64).unwrap(), b"one");
        assert_eq!(source.read_line(64).unwrap(), b"two");
        assert_eq!(source.read_line(64).unwrap(), b"three");
        assert_eq!(source.read_line(64).unwrap(), b"four");
    }

    #[test]
    fn read_line_honours_max() {
        let mut source = MemorySource::new("t", b"abcdefgh\n".to_vec());
        assert_eq!(source.read_line(3).unwrap(), b"abc");
        assert_eq!(source.tell(), 3);
    }

    #[test]
    fn find_first_crosses_window_boundary() {
        let mut data = vec![b'.'; FIND_WINDOW - 2];
        data.extend_from_slice(b"needle");
        let mut source = MemorySource::new("t", data);
        let found = find_first(&mut source, b"needle", 0, 0, &mut AcceptFirst).unwrap();
        assert!(found);
        assert_eq!(source.tell(), (FIND_WINDOW - 2) as u64);
    }

    #[test]
    fn find_last_picks_final_match() {
        let mut source = MemorySource::new("t", b"obj..obj....obj..".to_vec());
        let found = find_last(&mut source, b"obj", 0, 0, &mut AcceptFirst).unwrap();
        assert!(found);
        assert_eq!(source.tell(), 12);
    }

    #[test]
    fn verifier_reject_resumes_past_match() {
        let mut source = MemorySource::new("t", b"ab ab ab".to_vec());
        let mut seen = Vec::new();
        let mut verifier = |s: &mut dyn Source| {
            let at = s.tell();
            seen.push(at);
            at >= 6
        };
        assert!(find_first(&mut source, b"ab", 0, 0, &mut verifier).unwrap());
        assert_eq!(seen, vec![0, 3, 6]);
    }

    #[test]
    fn view_is_relative() {
        let data = Rc::new(b"0123456789".to_vec());
        let mut view = ViewSource::new("v", data, 4, 3);
        let mut buf = [0u8; 8];
        let n = view.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"456");
    }
}
