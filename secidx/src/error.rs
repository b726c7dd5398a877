//! Error types for secidx

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: io::Error,
    },

    #[error("failed to unlink {path}: {source}")]
    Unlink {
        path: PathBuf,
        source: io::Error,
    },

    #[error("write failed on {path}: {source}")]
    Write {
        path: PathBuf,
        source: io::Error,
    },

    #[error("codec error: {0}")]
    Codec(String),

    #[error("PGM build error: {0}")]
    Pgm(String),
}

pub type Result<T> = std::result::Result<T, Error>;
