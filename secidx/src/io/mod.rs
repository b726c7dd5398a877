mod mem;
mod mmap;
mod reader;
mod writer;

pub use mem::MemWriter;
pub use mmap::{MapElem, MappedSlice};
pub use reader::FileReader;
pub use writer::FileWriter;

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Append the whole of `src` onto the end of `dst`.
pub fn append_file(src: &Path, dst: &Path) -> Result<u64> {
    let reader = File::open(src).map_err(|source| Error::Open {
        path: src.to_path_buf(),
        source,
    })?;
    let file = OpenOptions::new()
        .append(true)
        .open(dst)
        .map_err(|source| Error::Open {
            path: dst.to_path_buf(),
            source,
        })?;
    let mut writer = BufWriter::new(file);
    let copied = io::copy(&mut BufReader::new(reader), &mut writer).map_err(|source| {
        Error::Write {
            path: dst.to_path_buf(),
            source,
        }
    })?;
    writer.flush().map_err(|source| Error::Write {
        path: dst.to_path_buf(),
        source,
    })?;
    Ok(copied)
}
