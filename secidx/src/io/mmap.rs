//! Read-only typed memory map. The PGM builder consumes the sorted
//! pgm-values temp file through this view; the footprint stays in the OS
//! page cache rather than the process heap.

use memmap2::Mmap;
use std::fs::File;
use std::marker::PhantomData;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Element types a file may be reinterpreted as. All are plain fixed-width
/// values with no invalid bit patterns relevant here; the map is page-aligned
/// so alignment always holds.
pub trait MapElem: Copy + 'static {}

impl MapElem for u32 {}
impl MapElem for u64 {}
impl MapElem for i64 {}
impl MapElem for f32 {}

pub struct MappedSlice<T: MapElem> {
    map: Option<Mmap>,
    len: usize,
    _marker: PhantomData<T>,
}

impl<T: MapElem> MappedSlice<T> {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = File::open(&path).map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        let byte_len = file
            .metadata()
            .map_err(|source| Error::Open {
                path: path.clone(),
                source,
            })?
            .len() as usize;
        if byte_len == 0 {
            return Ok(Self {
                map: None,
                len: 0,
                _marker: PhantomData,
            });
        }
        debug_assert_eq!(byte_len % std::mem::size_of::<T>(), 0);
        let map = unsafe { Mmap::map(&file) }.map_err(|source| Error::Open {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            len: byte_len / std::mem::size_of::<T>(),
            map: Some(map),
            _marker: PhantomData,
        })
    }

    pub fn as_slice(&self) -> &[T] {
        match &self.map {
            None => &[],
            Some(map) => unsafe {
                std::slice::from_raw_parts(map.as_ptr() as *const T, self.len)
            },
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
