//! Streaming secondary-index builder.
//!
//! Ingestion is row-oriented: the caller advances the rowid, then sets each
//! attribute's value(s) for that row. Per attribute the pairs spill to
//! sorted runs under a memory budget; `finish()` K-way merges every
//! attribute's runs into grouped, block-encoded rowid lists, builds one PGM
//! per attribute, and stitches META, the PGM stream, and the block-offsets
//! stream into a single self-describing file.

mod block;
mod format;
mod merge;
mod raw;

#[cfg(test)]
mod tests;

pub use format::{
    CODEC_NAME_U32, CODEC_NAME_U64, LIB_VERSION, Packing, STORAGE_VERSION, VALUES_PER_BLOCK,
    float_equal,
};

use std::path::PathBuf;

use crate::error::Result;
use crate::io::{self, FileWriter};
use crate::schema::{BitVec, Collation, ColumnInfo, SourceAttr};
use crate::structures::compute_deltas;

use raw::AnyRawWriter;

/// Version of the library that builds indexes.
pub fn lib_version() -> u32 {
    LIB_VERSION
}

/// Version of the on-disk format this library emits.
pub fn storage_version() -> u32 {
    STORAGE_VERSION
}

/// Build-time knobs.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Bound on raw-buffer memory across all attributes, in bytes.
    pub memory_limit: usize,
    /// Collation for STRING attributes.
    pub collation: Collation,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            collation: Collation::LibcCi,
        }
    }
}

/// Smallest raw-buffer row budget, regardless of the memory limit.
const MIN_ROWS_PER_FLUSH: usize = 1000;

pub struct Builder {
    path: PathBuf,
    rowid: u32,
    max_rows: u32,
    /// Dense by source-attribute index; unregistered slots stay None.
    raw: Vec<Option<AnyRawWriter>>,
    attrs: Vec<ColumnInfo>,
    collation: Collation,
}

impl Builder {
    /// Register the attributes and open one raw writer per indexable one.
    /// The memory limit is split three ways per spilled row (raw buffer,
    /// sort scratch, write buffer), floored at 1000 rows.
    pub fn new(
        src_attrs: &[SourceAttr],
        config: BuilderConfig,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let path = path.into();
        let slots = src_attrs
            .iter()
            .map(|a| a.attr + 1)
            .max()
            .unwrap_or(0);
        let mut raw: Vec<Option<AnyRawWriter>> = Vec::new();
        raw.resize_with(slots, || None);

        let mut attrs = Vec::new();
        for src in src_attrs {
            let Some(writer) =
                AnyRawWriter::new(&path, src.attr, src.attr_type, config.collation)?
            else {
                continue;
            };
            raw[src.attr] = Some(writer);
            attrs.push(ColumnInfo {
                name: src.name.clone(),
                src_attr: src.attr,
                attr: attrs.len(),
                attr_type: src.attr_type,
            });
        }

        let row_size: usize = raw
            .iter()
            .flatten()
            .map(AnyRawWriter::item_size)
            .sum();
        let max_rows = if row_size == 0 {
            MIN_ROWS_PER_FLUSH
        } else {
            MIN_ROWS_PER_FLUSH.max(config.memory_limit / 3 / row_size)
        };
        for writer in raw.iter_mut().flatten() {
            writer.reserve(max_rows);
        }

        Ok(Self {
            path,
            rowid: 0,
            max_rows: max_rows as u32,
            raw,
            attrs,
            collation: config.collation,
        })
    }

    /// Advance the current rowid. Must be monotonically non-decreasing.
    /// Every `max_rows` rowids all attributes spill a sorted run, which is
    /// what keeps memory bounded.
    pub fn set_rowid(&mut self, rowid: u32) {
        self.rowid = rowid;
        if rowid % self.max_rows == 0 {
            self.flush_all();
        }
    }

    /// Scalar attribute value for the current row. For FLOAT attributes the
    /// i64 carries the f32 bit pattern.
    pub fn set_attr_int(&mut self, attr: usize, value: i64) {
        if let Some(Some(writer)) = self.raw.get_mut(attr) {
            writer.set_attr_int(self.rowid, value);
        }
    }

    /// String attribute value for the current row.
    pub fn set_attr_bytes(&mut self, attr: usize, bytes: &[u8]) {
        if let Some(Some(writer)) = self.raw.get_mut(attr) {
            writer.set_attr_bytes(self.rowid, bytes);
        }
    }

    /// Set-typed attribute value for the current row: one entry per member.
    pub fn set_attr_mva(&mut self, attr: usize, values: &[i64]) {
        if let Some(Some(writer)) = self.raw.get_mut(attr) {
            writer.set_attr_mva(self.rowid, values);
        }
    }

    /// Finalize every attribute and write the index file. On error the
    /// output is undefined and should be deleted by the caller; temp files
    /// clean themselves up.
    pub fn finish(mut self) -> Result<()> {
        for writer in self.raw.iter_mut().flatten() {
            writer.done()?;
        }

        let mut si_writers = Vec::with_capacity(self.attrs.len());
        for writer in std::mem::take(&mut self.raw).into_iter().flatten() {
            si_writers.push(writer.into_si_writer());
        }

        let mut dst = FileWriter::open(&self.path, true, true, false)?;

        let blocks_path = PathBuf::from(format!("{}.tmp.meta", self.path.display()));
        let mut blocks_tmp = FileWriter::open(&blocks_path, true, true, true)?;
        let pgm_path = PathBuf::from(format!("{}.tmp.pgm", self.path.display()));
        let mut pgm_tmp = FileWriter::open(&pgm_path, true, true, true)?;
        let pgm_values_path = PathBuf::from(format!("{}.tmp.pgmvalues", self.path.display()));

        // reserve space for the header: version + offset to META
        dst.write_u32(LIB_VERSION);
        dst.write_u64(0);

        let n_attrs = si_writers.len();
        let mut blocks_off_start = Vec::with_capacity(n_attrs);
        for (attr, mut writer) in si_writers.into_iter().enumerate() {
            blocks_off_start.push(blocks_tmp.pos());
            writer.process(&mut dst, &mut blocks_tmp, &pgm_values_path)?;

            let pgm = writer.pgm_bytes();
            pgm_tmp.pack_u64(pgm.len() as u64);
            pgm_tmp.write(pgm);
            log::debug!("attribute {attr} finalized, pgm {} bytes", pgm.len());
        }

        let blocks_end = blocks_tmp.pos();
        let mut blocks_count = vec![0u64; n_attrs];
        for i in 1..n_attrs {
            blocks_count[i - 1] = (blocks_off_start[i] - blocks_off_start[i - 1]) / 8;
        }
        if n_attrs > 0 {
            blocks_count[n_attrs - 1] = (blocks_end - blocks_off_start[n_attrs - 1]) / 8;
        }

        let meta_off = dst.pos();
        dst.close()?;
        blocks_tmp.close()?;
        pgm_tmp.close()?;

        // counts derive from the absolute starts; only the deltas persist
        compute_deltas(&mut blocks_off_start);
        self.write_meta(meta_off, &blocks_off_start, &blocks_count)?;

        io::append_file(&pgm_path, &self.path)?;
        io::append_file(&blocks_path, &self.path)?;
        Ok(())
        // blocks_tmp / pgm_tmp drop here and unlink their files
    }

    fn write_meta(
        &self,
        meta_off: u64,
        blocks_off_start: &[u64],
        blocks_count: &[u64],
    ) -> Result<()> {
        let mut out = FileWriter::open(&self.path, false, false, false)?;

        // patch the header slot, then append META at its recorded offset
        out.seek(4);
        out.write_u64(meta_off);
        out.seek(meta_off);

        out.write_u64(0); // link to next meta
        out.write_u32(self.attrs.len() as u32);

        let mut enabled = BitVec::new(self.attrs.len());
        enabled.set_all();
        for &word in enabled.words() {
            out.write_u32(word);
        }

        out.write_string(CODEC_NAME_U32);
        out.write_string(CODEC_NAME_U64);
        out.write_u32(self.collation as u32);
        out.write_u32(VALUES_PER_BLOCK as u32);

        for info in &self.attrs {
            out.write_string(&info.name);
            out.pack_u32(info.src_attr as u32);
            out.pack_u32(info.attr as u32);
            out.pack_u32(info.attr_type as u32);
        }

        write_packed_u64s(&mut out, blocks_off_start);
        write_packed_u64s(&mut out, blocks_count);

        out.close()
    }

    fn flush_all(&mut self) {
        for writer in self.raw.iter_mut().flatten() {
            writer.flush();
        }
    }
}

/// Varint count followed by each element varint-packed.
fn write_packed_u64s(out: &mut FileWriter, values: &[u64]) {
    out.pack_u32(values.len() as u32);
    for &v in values {
        out.pack_u64(v);
    }
}
