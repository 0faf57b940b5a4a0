//! Byte-addressable, optionally seekable stream wrapper (spec §4.1).
//!
//! The image builder is written to never seek backwards, so the same
//! code serves both regular files and pipes: when the underlying handle
//! is actually seekable we delegate, and when it isn't we emulate a
//! forward-only seek by discarding (reads) or zero-filling (writes).

use std::io::{self, Read, Seek, SeekFrom, Write};

use vorteil_core::error::{Result, VorteilError};

/// Blanket marker for handles that are both readable and truly seekable.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

/// Blanket marker for handles that are both writable and truly seekable.
pub trait WriteSeek: Write + Seek {}
impl<T: Write + Seek> WriteSeek for T {}

enum Source {
    Seekable(Box<dyn ReadSeek>),
    Forward(Box<dyn Read>),
}

enum Sink {
    Seekable(Box<dyn WriteSeek>),
    Forward(Box<dyn Write>),
}

/// A read-side `BinaryIO`. Construct with [`BinaryReader::seekable`] when
/// the handle truly supports `Seek` (regular files), or
/// [`BinaryReader::forward_only`] for a pipe/stream where only forward
/// seeks (implemented as discards) are possible.
pub struct BinaryReader {
    source: Source,
    position: u64,
    total_size: Option<u64>,
}

impl BinaryReader {
    pub fn seekable<R: ReadSeek + 'static>(mut r: R) -> Result<Self> {
        let total = r.seek(SeekFrom::End(0))?;
        r.seek(SeekFrom::Start(0))?;
        Ok(Self { source: Source::Seekable(Box::new(r)), position: 0, total_size: Some(total) })
    }

    pub fn forward_only<R: Read + 'static>(r: R, total_size: Option<u64>) -> Self {
        Self { source: Source::Forward(Box::new(r)), position: 0, total_size }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// Reads exactly `buf.len()` bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        match &mut self.source {
            Source::Seekable(r) => r.read_exact(buf)?,
            Source::Forward(r) => r.read_exact(buf)?,
        }
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn read_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Seeks to an absolute offset. Backward seeks on a forward-only
    /// stream fail with `CannotRewind`.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        match &mut self.source {
            Source::Seekable(r) => {
                r.seek(SeekFrom::Start(offset))?;
                self.position = offset;
                Ok(())
            }
            Source::Forward(r) => {
                if offset < self.position {
                    return Err(VorteilError::CannotRewind);
                }
                let mut remaining = offset - self.position;
                let mut sink = [0u8; 4096];
                while remaining > 0 {
                    let chunk = remaining.min(sink.len() as u64) as usize;
                    r.read_exact(&mut sink[..chunk])?;
                    remaining -= chunk as u64;
                }
                self.position = offset;
                Ok(())
            }
        }
    }

    pub fn seek_from_end(&mut self, back: u64) -> Result<()> {
        let total = self.total_size.ok_or(VorteilError::UnsupportedRead)?;
        let target = total.checked_sub(back).ok_or(VorteilError::CannotRewind)?;
        self.seek_to(target)
    }
}

/// A write-side `BinaryIO`. See [`BinaryReader`] for the seekable /
/// forward-only distinction; here forward seeks are emulated by
/// zero-filling rather than discarding.
pub struct BinaryWriter {
    sink: Sink,
    position: u64,
}

impl BinaryWriter {
    pub fn seekable<W: WriteSeek + 'static>(w: W) -> Self {
        Self { sink: Sink::Seekable(Box::new(w)), position: 0 }
    }

    pub fn forward_only<W: Write + 'static>(w: W) -> Self {
        Self { sink: Sink::Forward(Box::new(w)), position: 0 }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        match &mut self.sink {
            Sink::Seekable(w) => w.write_all(bytes)?,
            Sink::Forward(w) => w.write_all(bytes)?,
        }
        self.position += bytes.len() as u64;
        Ok(())
    }

    pub fn write_zeros(&mut self, count: u64) -> Result<()> {
        const CHUNK: usize = 64 * 1024;
        let zeros = [0u8; CHUNK];
        let mut remaining = count;
        while remaining > 0 {
            let take = remaining.min(CHUNK as u64) as usize;
            self.write_all(&zeros[..take])?;
            remaining -= take as u64;
        }
        Ok(())
    }

    /// Seeks forward to an absolute offset. On a truly seekable handle
    /// this is a real seek (used to skip over reserved slack without
    /// writing it); on a forward-only handle this zero-fills the gap.
    /// Backward seeks always fail with `CannotRewind` — the builder must
    /// never need one.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset < self.position {
            return Err(VorteilError::CannotRewind);
        }
        match &mut self.sink {
            Sink::Seekable(w) => {
                w.seek(SeekFrom::Start(offset))?;
                self.position = offset;
                Ok(())
            }
            Sink::Forward(_) => {
                let gap = offset - self.position;
                self.write_zeros(gap)
            }
        }
    }

    pub fn flush(&mut self) -> Result<()> {
        match &mut self.sink {
            Sink::Seekable(w) => w.flush()?,
            Sink::Forward(w) => w.flush()?,
        }
        Ok(())
    }
}

impl Write for BinaryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all(buf).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        BinaryWriter::flush(self).map_err(|e| io::Error::new(io::ErrorKind::Other, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Clone, Default)]
    struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn forward_writer_zero_fills_gaps() {
        let shared = SharedBuf::default();
        let mut w = BinaryWriter::forward_only(shared.clone());
        w.write_all(b"AB").unwrap();
        w.seek_to(5).unwrap();
        w.write_all(b"C").unwrap();
        assert_eq!(w.position(), 6);
        assert_eq!(&*shared.0.lock().unwrap(), b"AB\0\0\0C");
    }

    #[test]
    fn forward_writer_rejects_backward_seek() {
        let mut w = BinaryWriter::forward_only(Vec::<u8>::new());
        w.write_all(b"hello").unwrap();
        assert!(matches!(w.seek_to(0), Err(VorteilError::CannotRewind)));
    }

    #[test]
    fn seekable_writer_round_trips_with_cursor() {
        let cursor = Cursor::new(vec![0u8; 16]);
        let mut w = BinaryWriter::seekable(cursor);
        w.write_all(b"hi").unwrap();
        w.seek_to(10).unwrap();
        w.write_all(b"!").unwrap();
        assert_eq!(w.position(), 11);
    }

    #[test]
    fn forward_reader_discards_to_seek() {
        let data = b"0123456789".to_vec();
        let mut r = BinaryReader::forward_only(Cursor::new(data), Some(10));
        r.seek_to(5).unwrap();
        let mut buf = [0u8; 2];
        r.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"56");
    }

    #[test]
    fn forward_reader_rejects_backward_seek() {
        let data = b"0123456789".to_vec();
        let mut r = BinaryReader::forward_only(Cursor::new(data), Some(10));
        r.seek_to(5).unwrap();
        assert!(matches!(r.seek_to(1), Err(VorteilError::CannotRewind)));
    }
}
