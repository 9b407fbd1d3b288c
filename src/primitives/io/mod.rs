#![forbid(unsafe_code)]

use std::{fs::File, io, path::Path, sync::Arc};

use tracing::trace;

use crate::types::{Result, StrataError};

/// Positioned file I/O used by the node table.
///
/// The table only ever reads and writes whole pages at page-aligned offsets,
/// so implementations do not need to support partial-page semantics.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`, extending the file if needed.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Flushes file data and metadata to stable storage.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current file length in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
mod platform {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::unix::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.read_at(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "read_at reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.write_at(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "write_at wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(windows)]
mod platform {
    use std::{
        fs::File,
        io::{self, ErrorKind},
        os::windows::fs::FileExt,
    };

    pub fn read_exact(file: &File, mut off: u64, mut dst: &mut [u8]) -> io::Result<()> {
        while !dst.is_empty() {
            let read = file.seek_read(dst, off)?;
            if read == 0 {
                return Err(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "seek_read reached EOF",
                ));
            }
            let (_, tail) = dst.split_at_mut(read);
            dst = tail;
            off += read as u64;
        }
        Ok(())
    }

    pub fn write_all(file: &File, mut off: u64, mut src: &[u8]) -> io::Result<()> {
        while !src.is_empty() {
            let written = file.seek_write(src, off)?;
            if written == 0 {
                return Err(io::Error::new(
                    ErrorKind::WriteZero,
                    "seek_write wrote zero bytes",
                ));
            }
            src = &src[written..];
            off += written as u64;
        }
        Ok(())
    }
}

#[cfg(not(any(unix, windows)))]
mod platform {
    use std::{fs::File, io};

    pub fn read_exact(_file: &File, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "positioned reads unsupported on this platform",
        ))
    }

    pub fn write_all(_file: &File, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "positioned writes unsupported on this platform",
        ))
    }
}

/// [`FileIo`] over a shared `std::fs::File`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Wraps an already opened file.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        trace!(off, len = dst.len(), "io.read_at");
        platform::read_exact(self.file(), off, dst).map_err(StrataError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        trace!(off, len = src.len(), "io.write_at");
        platform::write_all(self.file(), off, src).map_err(StrataError::from)
    }

    fn sync_all(&self) -> Result<()> {
        let result = self.file().sync_all().map_err(StrataError::from);
        if let Err(err) = &result {
            trace!(error = %err, "io.sync_all.error");
        }
        result
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file().set_len(len).map_err(StrataError::from)
    }
}

/// Maps an unexpected EOF while reading persisted state to a corruption error.
pub(crate) fn eof_as_corruption(err: StrataError, what: &'static str) -> StrataError {
    match err {
        StrataError::Io(inner) if inner.kind() == io::ErrorKind::UnexpectedEof => {
            StrataError::Corruption(what)
        }
        other => other,
    }
}
