//! Push-style byte sinks. Codecs and the writer are built as chains of
//! [`Sink`]s: bytes go in through `write_all`, `finish` flushes whatever the
//! stage buffered and must be called exactly once, on success and failure
//! paths alike.

use crate::{Error, Result};

pub trait Sink {
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush buffered state downstream. After `finish` returns the sink must
    /// not be written to again.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Collects everything written into a `Vec<u8>`, optionally refusing to grow
/// past a cap.
#[derive(Debug, Default)]
pub struct BufferSink {
    data: Vec<u8>,
    limit: Option<usize>,
    context: &'static str,
}

impl BufferSink {
    pub fn new() -> Self {
        BufferSink::default()
    }

    pub fn with_limit(limit: usize, context: &'static str) -> Self {
        BufferSink {
            data: Vec::new(),
            limit: Some(limit),
            context,
        }
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Sink for BufferSink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        if let Some(limit) = self.limit {
            if self.data.len() + data.len() > limit {
                return Err(Error::MemoryLimit { context: self.context, limit });
            }
        }
        self.data.extend_from_slice(data);
        Ok(())
    }
}

/// Counts bytes and discards them.
#[derive(Debug, Default)]
pub struct CountingSink {
    count: u64,
}

impl CountingSink {
    pub fn new() -> Self {
        CountingSink::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl Sink for CountingSink {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.count += data.len() as u64;
        Ok(())
    }
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl Sink for NullSink {
    fn write_all(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Duplicates writes to two downstream sinks.
pub struct TeeSink<'a> {
    first: &'a mut dyn Sink,
    second: &'a mut dyn Sink,
}

impl<'a> TeeSink<'a> {
    pub fn new(first: &'a mut dyn Sink, second: &'a mut dyn Sink) -> Self {
        TeeSink { first, second }
    }
}

impl Sink for TeeSink<'_> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.first.write_all(data)?;
        self.second.write_all(data)
    }

    fn finish(&mut self) -> Result<()> {
        let first = self.first.finish();
        let second = self.second.finish();
        first.and(second)
    }
}

/// Adapts any `std::io::Write`.
pub struct WriterSink<W: std::io::Write> {
    writer: W,
}

impl<W: std::io::Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: std::io::Write> Sink for WriterSink<W> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.writer.write_all(data)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

impl Sink for Vec<u8> {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.extend_from_slice(data);
        Ok(())
    }
}

/// Drives `feed` with a sink, guaranteeing `finish` runs even when `feed`
/// fails. The first error wins.
pub fn drive<S, F>(sink: &mut S, feed: F) -> Result<()>
where
    S: Sink + ?Sized,
    F: FnOnce(&mut S) -> Result<()>,
{
    let fed = feed(sink);
    let finished = sink.finish();
    fed.and(finished)
}
