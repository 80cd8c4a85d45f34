//! Little-endian field I/O over byte streams.
//!
//! `read_exact`/`write_all` retry short transfers until the full field has
//! moved or the stream reports an error.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{OvlError, Result};

pub(crate) struct FieldWriter<W> {
    inner: W,
}

impl<W: Write + Seek> FieldWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        FieldWriter { inner }
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> Result<()> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn write_i32(&mut self, value: i32) -> Result<()> {
        self.inner.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub(crate) fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.inner.write_all(bytes)?;
        Ok(())
    }

    /// Length-prefixed byte string.
    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            OvlError::InvalidArgument(format!("{}-byte name is too long to persist", bytes.len()))
        })?;
        self.write_u32(len)?;
        self.write_raw(bytes)
    }

    pub(crate) fn write_len(&mut self, len: usize, what: &str) -> Result<()> {
        let len = u32::try_from(len).map_err(|_| {
            OvlError::InvalidArgument(format!("{} count {} does not fit the format", what, len))
        })?;
        self.write_u32(len)
    }

    /// Reserve the record size field and return the record's start offset.
    pub(crate) fn begin_record(&mut self) -> Result<u64> {
        let start = self.inner.stream_position()?;
        self.write_u32(0)?;
        Ok(start)
    }

    /// Patch the size field reserved by `begin_record` and return to the end.
    pub(crate) fn end_record(&mut self, start: u64) -> Result<()> {
        let end = self.inner.stream_position()?;
        let size = u32::try_from(end - start).map_err(|_| {
            OvlError::InvalidArgument(format!("inode record of {} bytes is too large", end - start))
        })?;
        self.inner.seek(SeekFrom::Start(start))?;
        self.write_u32(size)?;
        self.inner.seek(SeekFrom::Start(end))?;
        Ok(())
    }
}

pub(crate) struct FieldReader<R> {
    inner: R,
    consumed: u64,
}

impl<R: Read> FieldReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        FieldReader { inner, consumed: 0 }
    }

    /// Bytes read so far.
    pub(crate) fn consumed(&self) -> u64 {
        self.consumed
    }

    /// Read the first field of the stream, `None` if the stream is empty.
    pub(crate) fn read_u32_or_eof(&mut self, what: &str) -> Result<Option<u32>> {
        let mut buf = [0u8; 4];
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        self.consumed += filled as u64;
        match filled {
            0 => Ok(None),
            4 => Ok(Some(u32::from_le_bytes(buf))),
            _ => Err(truncated(what)),
        }
    }

    pub(crate) fn read_u32(&mut self, what: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub(crate) fn read_i32(&mut self, what: &str) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(i32::from_le_bytes(buf))
    }

    pub(crate) fn read_word(&mut self, what: &str) -> Result<[u8; 4]> {
        let mut buf = [0u8; 4];
        self.fill(&mut buf, what)?;
        Ok(buf)
    }

    /// Length-prefixed byte string. The buffer grows as data arrives, so a
    /// corrupt length cannot force a huge allocation up front.
    pub(crate) fn read_bytes(&mut self, what: &str) -> Result<Vec<u8>> {
        let len = self.read_u32(what)?;
        let mut bytes = Vec::new();
        let read = (&mut self.inner)
            .take(u64::from(len))
            .read_to_end(&mut bytes)?;
        self.consumed += read as u64;
        if read != len as usize {
            return Err(truncated(what));
        }
        Ok(bytes)
    }

    fn fill(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.consumed += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(truncated(what)),
            Err(e) => Err(e.into()),
        }
    }
}

fn truncated(what: &str) -> OvlError {
    OvlError::Corrupt(format!("state file truncated while reading {}", what))
}
