//! Buffered append-with-seek writer over a single file.
//!
//! All multi-byte integers are written little-endian; packed integers use
//! the big-endian base-128 varint. The writer keeps a sticky error: after
//! the first failure every subsequent write is swallowed, and the failure
//! surfaces at the next `close()`/`flush()` checkpoint.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::structures::varint;

/// Default write-buffer size (1 MiB).
const DEFAULT_BUFFER: usize = 1 << 20;

pub struct FileWriter {
    file: Option<File>,
    path: PathBuf,
    buf: Vec<u8>,
    /// Physical offset the buffer's first byte will land at.
    file_pos: u64,
    temporary: bool,
    error: Option<io::Error>,
}

impl FileWriter {
    /// Open `path` for writing. `new_file` creates-or-truncates; otherwise
    /// the file must already exist. `append` starts at the current end of
    /// file. `temporary` files are unlinked when the writer is dropped.
    pub fn open(
        path: impl Into<PathBuf>,
        new_file: bool,
        append: bool,
        temporary: bool,
    ) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .read(!new_file)
            .create(new_file)
            .truncate(new_file)
            .open(&path)
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?;

        let file_pos = if append && !new_file {
            file.metadata()
                .map_err(|source| Error::Open {
                    path: path.clone(),
                    source,
                })?
                .len()
        } else {
            0
        };

        Ok(Self {
            file: Some(file),
            path,
            buf: Vec::with_capacity(DEFAULT_BUFFER),
            file_pos,
            temporary,
            error: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Logical position of the next write: physical position plus whatever
    /// is still buffered. Exact even with a non-empty buffer.
    pub fn pos(&self) -> u64 {
        self.file_pos + self.buf.len() as u64
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error(&self) -> Option<&io::Error> {
        self.error.as_ref()
    }

    pub fn write(&mut self, data: &[u8]) {
        if self.error.is_some() {
            return;
        }
        // A single user write is never split across a flush boundary: flush
        // first, then either buffer whole or write through whole.
        if self.buf.len() + data.len() > DEFAULT_BUFFER {
            self.flush_buf();
        }
        if data.len() >= DEFAULT_BUFFER {
            self.write_direct(data);
        } else {
            self.buf.extend_from_slice(data);
        }
    }

    pub fn write_u8(&mut self, v: u8) {
        self.write(&[v]);
    }

    pub fn write_u16(&mut self, v: u16) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    /// Varint-u64 length prefix followed by the raw bytes.
    pub fn write_string(&mut self, s: &str) {
        self.pack_u64(s.len() as u64);
        self.write(s.as_bytes());
    }

    pub fn pack_u32(&mut self, v: u32) {
        self.pack_u64(v as u64);
    }

    pub fn pack_u64(&mut self, v: u64) {
        let mut buf = [0u8; varint::MAX_PACKED_LEN];
        let n = varint::pack(v, &mut buf);
        self.write(&buf[..n]);
    }

    /// Flush the buffer, then retarget subsequent writes at `offset`.
    pub fn seek(&mut self, offset: u64) {
        self.flush_buf();
        self.file_pos = offset;
    }

    /// Write 8 bytes at `offset`, then restore the position the writer was
    /// appending at.
    pub fn seek_and_write(&mut self, offset: u64, value: u64) {
        let prior = self.pos();
        self.seek(offset);
        self.write_u64(value);
        self.seek(prior);
    }

    /// Flush buffered bytes; surfaces the sticky error if any.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_buf();
        self.check()
    }

    /// Flush and drop the file handle. The file itself is kept (temporary
    /// files are removed later, on drop).
    pub fn close(&mut self) -> Result<()> {
        self.flush_buf();
        self.file = None;
        self.check()
    }

    /// Remove the file, closing it first.
    pub fn unlink(&mut self) -> Result<()> {
        self.file = None;
        self.temporary = false;
        fs::remove_file(&self.path).map_err(|source| Error::Unlink {
            path: self.path.clone(),
            source,
        })
    }

    fn check(&self) -> Result<()> {
        match &self.error {
            None => Ok(()),
            Some(e) => Err(Error::Write {
                path: self.path.clone(),
                source: io::Error::new(e.kind(), e.to_string()),
            }),
        }
    }

    fn flush_buf(&mut self) {
        if self.buf.is_empty() || self.error.is_some() {
            self.buf.clear();
            return;
        }
        let Some(file) = self.file.as_mut() else {
            self.error = Some(io::Error::other("write after close"));
            return;
        };
        let res = file
            .seek(SeekFrom::Start(self.file_pos))
            .and_then(|_| file.write_all(&self.buf));
        match res {
            Ok(()) => self.file_pos += self.buf.len() as u64,
            Err(e) => self.error = Some(e),
        }
        self.buf.clear();
    }

    fn write_direct(&mut self, data: &[u8]) {
        let Some(file) = self.file.as_mut() else {
            self.error = Some(io::Error::other("write after close"));
            return;
        };
        let res = file
            .seek(SeekFrom::Start(self.file_pos))
            .and_then(|_| file.write_all(data));
        match res {
            Ok(()) => self.file_pos += data.len() as u64,
            Err(e) => self.error = Some(e),
        }
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        self.flush_buf();
        self.file = None;
        if self.temporary {
            let _ = fs::remove_file(&self.path);
        }
    }
}
