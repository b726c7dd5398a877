//! Buffered sequential reader, used to stream sorted runs back out of the
//! per-attribute temp files during the K-way merge.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const READ_BUFFER: usize = 256 * 1024;

pub struct FileReader {
    inner: BufReader<File>,
    path: PathBuf,
    pos: u64,
}

impl FileReader {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            inner: BufReader::with_capacity(READ_BUFFER, file),
            path,
            pos: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn seek(&mut self, offset: u64) -> io::Result<()> {
        self.inner.seek(SeekFrom::Start(offset))?;
        self.pos = offset;
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.inner.read_exact(buf)?;
        self.pos += buf.len() as u64;
        Ok(())
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        let v = self.inner.read_u32::<LittleEndian>()?;
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        let v = self.inner.read_u64::<LittleEndian>()?;
        self.pos += 8;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> io::Result<i64> {
        let v = self.inner.read_i64::<LittleEndian>()?;
        self.pos += 8;
        Ok(v)
    }

    pub fn read_f32(&mut self) -> io::Result<f32> {
        let v = self.inner.read_f32::<LittleEndian>()?;
        self.pos += 4;
        Ok(v)
    }
}
