//! Per-attribute finalizer: streams the sorted runs back, K-way merges them
//! through a min-heap, and drives block emission and PGM construction.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fs;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::io::{FileReader, FileWriter, MappedSlice};
use crate::structures::PgmIndex;

use super::block::RowBlockWriter;
use super::raw::SortKey;

/// One run being merged: the current entry plus its reader and the run's
/// end offset. Heap ordering is reversed so `BinaryHeap` pops the smallest
/// `(value, rowid)` first.
struct MergeSource<S: SortKey> {
    value: S,
    rowid: u32,
    reader: FileReader,
    end: u64,
}

impl<S: SortKey> MergeSource<S> {
    /// Advance to the next entry; false once the run is exhausted.
    fn read(&mut self) -> io::Result<bool> {
        if self.reader.pos() >= self.end {
            return Ok(false);
        }
        self.value = S::read_key(&mut self.reader)?;
        self.rowid = self.reader.read_u32()?;
        Ok(true)
    }
}

impl<S: SortKey> PartialEq for MergeSource<S> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<S: SortKey> Eq for MergeSource<S> {}

impl<S: SortKey> PartialOrd for MergeSource<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: SortKey> Ord for MergeSource<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse order for min-heap (BinaryHeap is a max-heap)
        S::cmp_values(other.value, self.value).then_with(|| other.rowid.cmp(&self.rowid))
    }
}

pub struct SiWriter<S: SortKey> {
    src_path: PathBuf,
    file_size: u64,
    offsets: Vec<u64>,
    pgm: Vec<u8>,
    _marker: PhantomData<S>,
}

impl<S: SortKey> SiWriter<S> {
    pub fn new(src_path: PathBuf, file_size: u64, offsets: Vec<u64>) -> Self {
        Self {
            src_path,
            file_size,
            offsets,
            pgm: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Merge all runs into grouped, block-encoded output, then build the PGM
    /// over the emitted value sequence. Value blocks go to `dst`, one u64
    /// start offset per block goes to `blocks_off`, and the raw sorted
    /// values pass through the `pgm_values_path` temp file.
    pub fn process(
        &mut self,
        dst: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values_path: &Path,
    ) -> Result<()> {
        let mut pgm_values = FileWriter::open(pgm_values_path, true, false, true)?;

        let mut heap: BinaryHeap<MergeSource<S>> = BinaryHeap::with_capacity(self.offsets.len());
        for (run, &start) in self.offsets.iter().enumerate() {
            let mut reader = FileReader::open(&self.src_path)?;
            reader.seek(start).map_err(Error::Io)?;
            let end = self
                .offsets
                .get(run + 1)
                .copied()
                .unwrap_or(self.file_size);
            let mut source = MergeSource {
                value: S::default(),
                rowid: 0,
                reader,
                end,
            };
            if source.read().map_err(Error::Io)? {
                heap.push(source);
            }
        }

        let mut writer = RowBlockWriter::<S::Storage>::new(S::IS_FLOAT)?;

        if let Some(mut source) = heap.pop() {
            writer.add_value(source.value.to_storage(), source.rowid);
            if source.read().map_err(Error::Io)? {
                heap.push(source);
            }
        }
        while let Some(mut source) = heap.pop() {
            writer.next_value(
                source.value.to_storage(),
                source.rowid,
                dst,
                blocks_off,
                &mut pgm_values,
            );
            if source.read().map_err(Error::Io)? {
                heap.push(source);
            }
        }
        writer.finish(dst, blocks_off, &mut pgm_values);
        drop(heap);

        dst.flush()?;
        blocks_off.flush()?;

        // Runs are consumed; release the raw file before the PGM build
        // takes its memory-mapped pass.
        fs::remove_file(&self.src_path).map_err(|source| Error::Unlink {
            path: self.src_path.clone(),
            source,
        })?;

        pgm_values.close()?;
        let mapped = MappedSlice::<S>::open(pgm_values_path)?;
        let values = mapped.as_slice();
        debug_assert!(
            values.windows(2).all(|pair| pair[0] <= pair[1]),
            "pgm-values file is not sorted"
        );
        let index = PgmIndex::build_from_sorted(values);
        self.pgm.clear();
        index.save(&mut self.pgm);

        log::debug!(
            "merged {} runs from {}: {} values, pgm {} segments / {} bytes",
            self.offsets.len(),
            self.src_path.display(),
            values.len(),
            index.n_segments(),
            self.pgm.len()
        );
        Ok(())
    }

    pub fn pgm_bytes(&self) -> &[u8] {
        &self.pgm
    }
}

/// Tagged dispatch over the storage pairs, mirroring `AnyRawWriter`.
pub enum AnySiWriter {
    U32(SiWriter<u32>),
    Float(SiWriter<f32>),
    Str(SiWriter<u64>),
    I64(SiWriter<i64>),
}

impl AnySiWriter {
    pub fn process(
        &mut self,
        dst: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values_path: &Path,
    ) -> Result<()> {
        match self {
            Self::U32(w) => w.process(dst, blocks_off, pgm_values_path),
            Self::Float(w) => w.process(dst, blocks_off, pgm_values_path),
            Self::Str(w) => w.process(dst, blocks_off, pgm_values_path),
            Self::I64(w) => w.process(dst, blocks_off, pgm_values_path),
        }
    }

    pub fn pgm_bytes(&self) -> &[u8] {
        match self {
            Self::U32(w) => w.pgm_bytes(),
            Self::Float(w) => w.pgm_bytes(),
            Self::Str(w) => w.pgm_bytes(),
            Self::I64(w) => w.pgm_bytes(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Write two overlapping sorted runs and check the heap delivers one
    /// globally sorted stream.
    #[test]
    fn test_merge_is_globally_sorted() {
        let tmp = TempDir::new().unwrap();
        let run_path = tmp.path().join("runs.bin");

        let mut w = FileWriter::open(&run_path, true, true, false).unwrap();
        // run 0: (1,0) (5,1) (9,2)
        for (v, r) in [(1u32, 0u32), (5, 1), (9, 2)] {
            w.write_u32(v);
            w.write_u32(r);
        }
        let second = w.pos();
        // run 1: (2,3) (5,4) (20,5)
        for (v, r) in [(2u32, 3u32), (5, 4), (20, 5)] {
            w.write_u32(v);
            w.write_u32(r);
        }
        let size = w.pos();
        w.close().unwrap();

        let mut heap: BinaryHeap<MergeSource<u32>> = BinaryHeap::new();
        for &(start, end) in &[(0, second), (second, size)] {
            let mut reader = FileReader::open(&run_path).unwrap();
            reader.seek(start).unwrap();
            let mut source = MergeSource {
                value: 0u32,
                rowid: 0,
                reader,
                end,
            };
            assert!(source.read().unwrap());
            heap.push(source);
        }

        let mut merged = Vec::new();
        while let Some(mut source) = heap.pop() {
            merged.push((source.value, source.rowid));
            if source.read().unwrap() {
                heap.push(source);
            }
        }
        assert_eq!(
            merged,
            vec![(1, 0), (2, 3), (5, 1), (5, 4), (9, 2), (20, 5)]
        );
    }
}
