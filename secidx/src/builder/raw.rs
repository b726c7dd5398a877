//! Per-attribute run producer.
//!
//! A `RawWriter` buffers `(value, rowid)` pairs, sorts them, and spills each
//! sorted batch as one run into a per-attribute temp file, recording run
//! start offsets. Polymorphism over the attribute type is a tagged variant
//! (`AnyRawWriter`) selected once at registration; the generic core is shared.

use std::cmp::Ordering;
use std::io;
use std::path::{Path, PathBuf};

use crate::collation::{StrHashFn, hash_fn};
use crate::error::Result;
use crate::io::{FileReader, FileWriter, MapElem};
use crate::schema::{AttrType, Collation};
use crate::structures::PgmKey;

use super::block::StorageInt;
use super::format::float_equal;
use super::merge::{AnySiWriter, SiWriter};

/// One raw entry: the sort key plus the rowid it came from.
#[derive(Debug, Clone, Copy)]
pub struct RawValue<T> {
    pub value: T,
    pub rowid: u32,
}

/// Sort key of a raw run. Defines the on-disk record codec, the
/// (float-equality-aware) ordering, and the conversion into the storage
/// lane the block writer packs.
pub trait SortKey: Copy + Default + PgmKey + MapElem {
    type Storage: StorageInt;
    const IS_FLOAT: bool = false;

    /// Packed record size: key bytes plus the u32 rowid, no padding.
    fn record_size() -> usize {
        std::mem::size_of::<Self>() + std::mem::size_of::<u32>()
    }

    fn cmp_values(a: Self, b: Self) -> Ordering;
    fn from_i64(v: i64) -> Self;
    fn to_storage(self) -> Self::Storage;
    fn write_key(self, w: &mut FileWriter);
    fn read_key(r: &mut FileReader) -> io::Result<Self>;
}

impl SortKey for u32 {
    type Storage = u32;

    fn cmp_values(a: Self, b: Self) -> Ordering {
        a.cmp(&b)
    }
    fn from_i64(v: i64) -> Self {
        v as u32
    }
    fn to_storage(self) -> u32 {
        self
    }
    fn write_key(self, w: &mut FileWriter) {
        w.write_u32(self);
    }
    fn read_key(r: &mut FileReader) -> io::Result<Self> {
        r.read_u32()
    }
}

impl SortKey for i64 {
    type Storage = u64;

    fn cmp_values(a: Self, b: Self) -> Ordering {
        a.cmp(&b)
    }
    fn from_i64(v: i64) -> Self {
        v
    }
    fn to_storage(self) -> u64 {
        self as u64
    }
    fn write_key(self, w: &mut FileWriter) {
        w.write_u64(self as u64);
    }
    fn read_key(r: &mut FileReader) -> io::Result<Self> {
        r.read_i64()
    }
}

impl SortKey for u64 {
    type Storage = u64;

    fn cmp_values(a: Self, b: Self) -> Ordering {
        a.cmp(&b)
    }
    fn from_i64(v: i64) -> Self {
        v as u64
    }
    fn to_storage(self) -> u64 {
        self
    }
    fn write_key(self, w: &mut FileWriter) {
        w.write_u64(self);
    }
    fn read_key(r: &mut FileReader) -> io::Result<Self> {
        r.read_u64()
    }
}

impl SortKey for f32 {
    type Storage = u32;
    const IS_FLOAT: bool = true;

    fn cmp_values(a: Self, b: Self) -> Ordering {
        if float_equal(a, b) {
            Ordering::Equal
        } else {
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
    }
    fn from_i64(v: i64) -> Self {
        f32::from_bits(v as u32)
    }
    fn to_storage(self) -> u32 {
        self.to_bits()
    }
    fn write_key(self, w: &mut FileWriter) {
        w.write_u32(self.to_bits());
    }
    fn read_key(r: &mut FileReader) -> io::Result<Self> {
        r.read_f32()
    }
}

/// `(value, rowid)` ascending; equal values (tolerant for floats) tie-break
/// on rowid, which keeps rowids strictly increasing within a group.
pub fn cmp_entry<T: SortKey>(a: &RawValue<T>, b: &RawValue<T>) -> Ordering {
    T::cmp_values(a.value, b.value).then_with(|| a.rowid.cmp(&b.rowid))
}

pub struct RawWriter<T: SortKey> {
    rows: Vec<RawValue<T>>,
    file: FileWriter,
    offsets: Vec<u64>,
    file_size: u64,
    hash: StrHashFn,
}

impl<T: SortKey> RawWriter<T> {
    fn new(out_base: &Path, attr: usize, collation: Collation) -> Result<Self> {
        let path = PathBuf::from(format!("{}.{}.tmp", out_base.display(), attr));
        // Not flagged temporary: the merge unlinks it explicitly as soon as
        // the runs are consumed.
        let file = FileWriter::open(path, true, true, false)?;
        Ok(Self {
            rows: Vec::new(),
            file,
            offsets: Vec::new(),
            file_size: 0,
            hash: hash_fn(collation),
        })
    }

    fn push(&mut self, value: T, rowid: u32) {
        self.rows.push(RawValue { value, rowid });
    }

    fn reserve(&mut self, n: usize) {
        self.rows.reserve(n);
    }

    /// Sort the buffer and spill it as one run.
    fn flush(&mut self) {
        if self.rows.is_empty() {
            return;
        }
        self.rows.sort_unstable_by(cmp_entry);
        self.offsets.push(self.file.pos());
        for entry in &self.rows {
            entry.value.write_key(&mut self.file);
            self.file.write_u32(entry.rowid);
        }
        self.rows.clear();
    }

    /// Final flush; closes the run file and releases the buffer.
    fn done(&mut self) -> Result<()> {
        self.flush();
        self.file_size = self.file.pos();
        self.file.close()?;
        self.rows = Vec::new();
        Ok(())
    }

    fn into_si_writer(self) -> SiWriter<T> {
        SiWriter::new(self.file.path().to_path_buf(), self.file_size, self.offsets)
    }
}

/// Tagged dispatch over the four storage pairs, chosen by `AttrType` once at
/// registration. Mistyped `set_attr` calls are programmer errors: they
/// assert in debug builds and are dropped in release builds.
pub enum AnyRawWriter {
    U32(RawWriter<u32>),
    Float(RawWriter<f32>),
    Str(RawWriter<u64>),
    I64(RawWriter<i64>),
}

impl AnyRawWriter {
    pub fn new(
        out_base: &Path,
        attr: usize,
        attr_type: AttrType,
        collation: Collation,
    ) -> Result<Option<Self>> {
        let writer = match attr_type {
            AttrType::Uint32 | AttrType::Timestamp | AttrType::Uint32Set => {
                Self::U32(RawWriter::new(out_base, attr, collation)?)
            }
            AttrType::Float => Self::Float(RawWriter::new(out_base, attr, collation)?),
            AttrType::String => Self::Str(RawWriter::new(out_base, attr, collation)?),
            AttrType::Int64 | AttrType::Int64Set => {
                Self::I64(RawWriter::new(out_base, attr, collation)?)
            }
            AttrType::None => return Ok(None),
        };
        Ok(Some(writer))
    }

    pub fn item_size(&self) -> usize {
        match self {
            Self::U32(_) => u32::record_size(),
            Self::Float(_) => f32::record_size(),
            Self::Str(_) => u64::record_size(),
            Self::I64(_) => i64::record_size(),
        }
    }

    pub fn reserve(&mut self, n: usize) {
        match self {
            Self::U32(w) => w.reserve(n),
            Self::Float(w) => w.reserve(n),
            Self::Str(w) => w.reserve(n),
            Self::I64(w) => w.reserve(n),
        }
    }

    /// Scalar ingest. For floats the i64 carries the value's u32 bit
    /// pattern, not a numeric cast.
    pub fn set_attr_int(&mut self, rowid: u32, value: i64) {
        match self {
            Self::U32(w) => w.push(u32::from_i64(value), rowid),
            Self::Float(w) => w.push(f32::from_i64(value), rowid),
            Self::I64(w) => w.push(i64::from_i64(value), rowid),
            Self::Str(_) => {
                debug_assert!(false, "integer value sent to a string attribute");
            }
        }
    }

    /// String ingest: the collation hash of the bytes becomes the key.
    pub fn set_attr_bytes(&mut self, rowid: u32, bytes: &[u8]) {
        match self {
            Self::Str(w) => {
                let key = (w.hash)(bytes);
                w.push(key, rowid);
            }
            _ => {
                debug_assert!(false, "byte value sent to a non-string attribute");
            }
        }
    }

    /// Set ingest: one entry per member, all sharing the rowid.
    pub fn set_attr_mva(&mut self, rowid: u32, values: &[i64]) {
        match self {
            Self::U32(w) => {
                for &v in values {
                    w.push(u32::from_i64(v), rowid);
                }
            }
            Self::I64(w) => {
                for &v in values {
                    w.push(v, rowid);
                }
            }
            _ => {
                debug_assert!(false, "set value sent to a non-set attribute");
            }
        }
    }

    pub fn flush(&mut self) {
        match self {
            Self::U32(w) => w.flush(),
            Self::Float(w) => w.flush(),
            Self::Str(w) => w.flush(),
            Self::I64(w) => w.flush(),
        }
    }

    pub fn done(&mut self) -> Result<()> {
        match self {
            Self::U32(w) => w.done(),
            Self::Float(w) => w.done(),
            Self::Str(w) => w.done(),
            Self::I64(w) => w.done(),
        }
    }

    pub fn into_si_writer(self) -> AnySiWriter {
        match self {
            Self::U32(w) => AnySiWriter::U32(w.into_si_writer()),
            Self::Float(w) => AnySiWriter::Float(w.into_si_writer()),
            Self::Str(w) => AnySiWriter::Str(w.into_si_writer()),
            Self::I64(w) => AnySiWriter::I64(w.into_si_writer()),
        }
    }
}
