//! Value-block assembly: groups equal values, packs their rowid lists, and
//! emits finished blocks to the output file.
//!
//! A block holds up to `VALUES_PER_BLOCK` adjacent value groups as parallel
//! arrays (values, packing types, row starts) plus one flat rowid payload.
//! Per group the rowid list is packed one of three ways by count: a single
//! rowid inline in the row-start slot, one encoded rowid block, or a
//! count-prefixed list of encoded rowid blocks.

use crate::error::Result;
use crate::io::{FileWriter, MemWriter};
use crate::structures::{DeltaInt, IntCodec, compute_deltas, create_int_codec};

use super::format::{CODEC_NAME_U32, CODEC_NAME_U64, Packing, VALUES_PER_BLOCK, float_equal};

/// Storage lane of a block's value array: u32 or u64. Floats travel as
/// their u32 bit pattern, i64 as its two's-complement u64.
pub trait StorageInt: Copy + Default + PartialEq + DeltaInt + 'static {
    fn encode_block(codec: &dyn IntCodec, src: &[Self], dst: &mut Vec<u32>);
    fn write_raw(self, w: &mut FileWriter);
    /// Group-boundary equality; tolerant when the lane carries float bits.
    fn eq_group(a: Self, b: Self, float_values: bool) -> bool;
}

impl StorageInt for u32 {
    fn encode_block(codec: &dyn IntCodec, src: &[Self], dst: &mut Vec<u32>) {
        codec.encode_u32(src, dst);
    }
    fn write_raw(self, w: &mut FileWriter) {
        w.write_u32(self);
    }
    fn eq_group(a: Self, b: Self, float_values: bool) -> bool {
        if float_values {
            float_equal(f32::from_bits(a), f32::from_bits(b))
        } else {
            a == b
        }
    }
}

impl StorageInt for u64 {
    fn encode_block(codec: &dyn IntCodec, src: &[Self], dst: &mut Vec<u32>) {
        codec.encode_u64(src, dst);
    }
    fn write_raw(self, w: &mut FileWriter) {
        w.write_u64(self);
    }
    fn eq_group(a: Self, b: Self, float_values: bool) -> bool {
        debug_assert!(!float_values);
        a == b
    }
}

pub struct RowBlockWriter<D: StorageInt> {
    values: Vec<D>,
    types: Vec<u32>,
    row_start: Vec<u32>,
    /// All unencoded rowids of the current block, in emission order.
    rows: Vec<u32>,

    buf_tmp: Vec<u32>,
    rows_packed: Vec<u8>,
    group_scratch: Vec<u32>,
    last_value: D,

    float_values: bool,
    codec: Box<dyn IntCodec>,
}

impl<D: StorageInt> RowBlockWriter<D> {
    pub fn new(float_values: bool) -> Result<Self> {
        Ok(Self {
            values: Vec::with_capacity(VALUES_PER_BLOCK),
            types: Vec::with_capacity(VALUES_PER_BLOCK),
            row_start: Vec::with_capacity(VALUES_PER_BLOCK),
            rows: Vec::with_capacity(VALUES_PER_BLOCK * 16),
            buf_tmp: Vec::with_capacity(VALUES_PER_BLOCK),
            rows_packed: Vec::with_capacity(VALUES_PER_BLOCK * 16),
            group_scratch: Vec::with_capacity(VALUES_PER_BLOCK),
            last_value: D::default(),
            float_values,
            codec: create_int_codec(CODEC_NAME_U32, CODEC_NAME_U64)?,
        })
    }

    /// Open a new value group.
    pub fn add_value(&mut self, value: D, rowid: u32) {
        self.row_start.push(self.rows.len() as u32);
        self.values.push(value);
        self.rows.push(rowid);
        self.last_value = value;
    }

    /// Extend the current group if the value matches, otherwise flush a full
    /// block and open a new group.
    pub fn next_value(
        &mut self,
        value: D,
        rowid: u32,
        dst: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values: &mut FileWriter,
    ) {
        if D::eq_group(self.last_value, value, self.float_values) {
            self.rows.push(rowid);
        } else {
            if self.values.len() >= VALUES_PER_BLOCK {
                self.flush_block(dst, blocks_off, pgm_values);
            }
            self.add_value(value, rowid);
        }
    }

    /// Flush the trailing partial block.
    pub fn finish(
        &mut self,
        dst: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values: &mut FileWriter,
    ) {
        self.flush_block(dst, blocks_off, pgm_values);
    }

    fn flush_block(
        &mut self,
        dst: &mut FileWriter,
        blocks_off: &mut FileWriter,
        pgm_values: &mut FileWriter,
    ) {
        debug_assert_eq!(self.values.len(), self.row_start.len());
        if self.values.is_empty() {
            return;
        }
        let n_values = self.values.len();

        // Any single-rowid group stores its rowid inline in row_start, which
        // breaks the array's monotonicity; that disables delta encoding of
        // row_start for the whole block.
        let mut len_delta = true;

        self.types.resize(n_values, 0);
        let mut packed = std::mem::take(&mut self.rows_packed);
        packed.clear();
        {
            let mut payload = MemWriter::new(&mut packed);
            for item in 0..n_values {
                let start = self.row_start[item] as usize;
                let count = if item + 1 < n_values {
                    self.row_start[item + 1] as usize - start
                } else {
                    self.rows.len() - start
                };

                if count == 1 {
                    self.types[item] = Packing::Row as u32;
                    self.row_start[item] = self.rows[start];
                    len_delta = false;
                } else if count <= VALUES_PER_BLOCK {
                    self.types[item] = Packing::RowBlock as u32;
                    self.row_start[item] = payload.pos() as u32;
                    encode_rows_block(
                        &*self.codec,
                        &self.rows[start..start + count],
                        &mut self.group_scratch,
                        &mut self.buf_tmp,
                        &mut payload,
                    );
                } else {
                    self.types[item] = Packing::RowBlocksList as u32;
                    self.row_start[item] = payload.pos() as u32;

                    let blocks = count.div_ceil(VALUES_PER_BLOCK);
                    payload.pack_u32(blocks as u32);
                    for block in 0..blocks {
                        let s = start + block * VALUES_PER_BLOCK;
                        let c = VALUES_PER_BLOCK.min(start + count - s);
                        encode_rows_block(
                            &*self.codec,
                            &self.rows[s..s + c],
                            &mut self.group_scratch,
                            &mut self.buf_tmp,
                            &mut payload,
                        );
                    }
                }
            }
        }

        // Offset bookkeeping goes to the separate blocks-off stream; raw
        // values feed the PGM builder.
        blocks_off.write_u64(dst.pos());
        for &value in &self.values {
            value.write_raw(pgm_values);
        }

        compute_deltas(&mut self.values);
        self.buf_tmp.clear();
        D::encode_block(&*self.codec, &self.values, &mut self.buf_tmp);
        write_words(&self.buf_tmp, dst);

        self.buf_tmp.clear();
        self.codec.encode_u32(&self.types, &mut self.buf_tmp);
        write_words(&self.buf_tmp, dst);

        dst.write_u8(len_delta as u8);
        if len_delta {
            compute_deltas(&mut self.row_start);
        }
        self.buf_tmp.clear();
        self.codec.encode_u32(&self.row_start, &mut self.buf_tmp);
        write_words(&self.buf_tmp, dst);

        dst.write(&packed);

        self.rows_packed = packed;
        self.values.clear();
        self.types.clear();
        self.row_start.clear();
        self.rows.clear();
        self.rows_packed.clear();
    }
}

/// One encoded rowid block: varint min rowid, varint rowid span, then the
/// delta+codec-packed rowids as a word-count-prefixed u32 stream. The group
/// slice is staged through `scratch` because the delta pass mutates it.
fn encode_rows_block(
    codec: &dyn IntCodec,
    rows: &[u32],
    scratch: &mut Vec<u32>,
    buf: &mut Vec<u32>,
    out: &mut MemWriter<'_>,
) {
    debug_assert!(!rows.is_empty());
    scratch.clear();
    scratch.extend_from_slice(rows);

    let min = scratch[0];
    let max = *scratch.last().unwrap();
    compute_deltas(scratch);

    buf.clear();
    codec.encode_u32(scratch, buf);

    out.pack_u32(min);
    out.pack_u32(max - min);
    out.pack_u32(buf.len() as u32);
    for &word in buf.iter() {
        out.write_u32(word);
    }
}

/// Word-count-prefixed u32 stream, the length-prefixed form every encoded
/// array in a block uses.
fn write_words(words: &[u32], dst: &mut FileWriter) {
    dst.pack_u32(words.len() as u32);
    for &word in words {
        dst.write_u32(word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structures::{restore_deltas, unpack};
    use tempfile::TempDir;

    struct Sinks {
        dst: FileWriter,
        blocks_off: FileWriter,
        pgm_values: FileWriter,
    }

    fn sinks(dir: &TempDir) -> Sinks {
        Sinks {
            dst: FileWriter::open(dir.path().join("out"), true, true, false).unwrap(),
            blocks_off: FileWriter::open(dir.path().join("off"), true, true, false).unwrap(),
            pgm_values: FileWriter::open(dir.path().join("pgm"), true, true, false).unwrap(),
        }
    }

    /// Parse one block back out of the written bytes.
    fn parse_block(data: &[u8]) -> (Vec<u32>, Vec<Packing>, Vec<u32>, bool, Vec<u8>) {
        let codec = create_int_codec(CODEC_NAME_U32, CODEC_NAME_U64).unwrap();
        let mut pos = 0usize;

        let mut read_words = |pos: &mut usize| -> Vec<u32> {
            let (count, n) = unpack(&data[*pos..]).unwrap();
            *pos += n;
            let mut words = Vec::with_capacity(count as usize);
            for _ in 0..count {
                words.push(u32::from_le_bytes(
                    data[*pos..*pos + 4].try_into().unwrap(),
                ));
                *pos += 4;
            }
            words
        };

        let mut values = Vec::new();
        codec.decode_u32(&read_words(&mut pos), &mut values);
        restore_deltas(&mut values);

        let mut types = Vec::new();
        codec.decode_u32(&read_words(&mut pos), &mut types);
        let types: Vec<Packing> = types.iter().map(|&t| Packing::from_u32(t).unwrap()).collect();

        let len_delta = data[pos] != 0;
        pos += 1;

        let mut row_start = Vec::new();
        codec.decode_u32(&read_words(&mut pos), &mut row_start);
        if len_delta {
            restore_deltas(&mut row_start);
        }

        (values, types, row_start, len_delta, data[pos..].to_vec())
    }

    fn decode_rowid_block(payload: &[u8], pos: &mut usize) -> Vec<u32> {
        let codec = create_int_codec(CODEC_NAME_U32, CODEC_NAME_U64).unwrap();
        let (min, n) = unpack(&payload[*pos..]).unwrap();
        *pos += n;
        let (span, n) = unpack(&payload[*pos..]).unwrap();
        *pos += n;
        let (words, n) = unpack(&payload[*pos..]).unwrap();
        *pos += n;
        let mut packed = Vec::with_capacity(words as usize);
        for _ in 0..words {
            packed.push(u32::from_le_bytes(
                payload[*pos..*pos + 4].try_into().unwrap(),
            ));
            *pos += 4;
        }
        let mut rows = Vec::new();
        codec.decode_u32(&packed, &mut rows);
        restore_deltas(&mut rows);
        assert_eq!(rows[0], min as u32);
        assert_eq!(*rows.last().unwrap(), min as u32 + span as u32);
        rows
    }

    #[test]
    fn test_two_groups_row_block_and_row() {
        let tmp = TempDir::new().unwrap();
        let mut s = sinks(&tmp);
        let mut w = RowBlockWriter::<u32>::new(false).unwrap();

        w.add_value(10, 0);
        w.next_value(10, 1, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        w.next_value(20, 2, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        w.finish(&mut s.dst, &mut s.blocks_off, &mut s.pgm_values);

        s.dst.close().unwrap();
        s.blocks_off.close().unwrap();
        s.pgm_values.close().unwrap();

        let data = std::fs::read(tmp.path().join("out")).unwrap();
        let (values, types, row_start, len_delta, payload) = parse_block(&data);

        assert_eq!(values, vec![10, 20]);
        assert_eq!(types, vec![Packing::RowBlock, Packing::Row]);
        assert!(!len_delta);
        // group 0: payload offset; group 1: the rowid itself
        assert_eq!(row_start[0], 0);
        assert_eq!(row_start[1], 2);

        let mut pos = 0;
        assert_eq!(decode_rowid_block(&payload, &mut pos), vec![0, 1]);
        assert_eq!(pos, payload.len());

        // blocks-off stream holds the block's start offset in dst
        let off = std::fs::read(tmp.path().join("off")).unwrap();
        assert_eq!(off, 0u64.to_le_bytes());
        // pgm values are the raw keys
        let pgm = std::fs::read(tmp.path().join("pgm")).unwrap();
        assert_eq!(pgm.len(), 8);
        assert_eq!(&pgm[0..4], &10u32.to_le_bytes());
        assert_eq!(&pgm[4..8], &20u32.to_le_bytes());
    }

    #[test]
    fn test_over_128_rowids_use_blocks_list() {
        let tmp = TempDir::new().unwrap();
        let mut s = sinks(&tmp);
        let mut w = RowBlockWriter::<u32>::new(false).unwrap();

        w.add_value(7, 0);
        for rowid in 1..150 {
            w.next_value(7, rowid, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        }
        w.finish(&mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        s.dst.close().unwrap();

        let data = std::fs::read(tmp.path().join("out")).unwrap();
        let (values, types, row_start, len_delta, payload) = parse_block(&data);
        assert_eq!(values, vec![7]);
        assert_eq!(types, vec![Packing::RowBlocksList]);
        assert!(len_delta);
        assert_eq!(row_start, vec![0]);

        let mut pos = 0;
        let (blocks, n) = unpack(&payload).unwrap();
        pos += n;
        assert_eq!(blocks, 2);
        let first = decode_rowid_block(&payload, &mut pos);
        assert_eq!(first.len(), 128);
        assert_eq!(first, (0..128).collect::<Vec<u32>>());
        let second = decode_rowid_block(&payload, &mut pos);
        assert_eq!(second.len(), 22);
        assert_eq!(second, (128..150).collect::<Vec<u32>>());
        assert_eq!(pos, payload.len());
    }

    #[test]
    fn test_block_splits_at_128_groups() {
        let tmp = TempDir::new().unwrap();
        let mut s = sinks(&tmp);
        let mut w = RowBlockWriter::<u32>::new(false).unwrap();

        w.add_value(0, 0);
        for v in 1..200u32 {
            w.next_value(v, v, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        }
        w.finish(&mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        s.dst.close().unwrap();
        s.blocks_off.close().unwrap();

        // two block offsets recorded
        let off = std::fs::read(tmp.path().join("off")).unwrap();
        assert_eq!(off.len(), 16);
        let first_off = u64::from_le_bytes(off[0..8].try_into().unwrap());
        let second_off = u64::from_le_bytes(off[8..16].try_into().unwrap());
        assert_eq!(first_off, 0);

        let data = std::fs::read(tmp.path().join("out")).unwrap();
        let (values, _, _, _, _) = parse_block(&data[..second_off as usize]);
        assert_eq!(values.len(), 128);
        let (values, _, _, _, _) = parse_block(&data[second_off as usize..]);
        assert_eq!(values.len(), 72);
    }

    #[test]
    fn test_len_delta_survives_without_row_groups() {
        let tmp = TempDir::new().unwrap();
        let mut s = sinks(&tmp);
        let mut w = RowBlockWriter::<u32>::new(false).unwrap();

        // two groups, two rowids each: no ROW packing, delta flag stays on
        w.add_value(5, 10);
        w.next_value(5, 20, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        w.next_value(9, 30, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        w.next_value(9, 31, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        w.finish(&mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        s.dst.close().unwrap();

        let data = std::fs::read(tmp.path().join("out")).unwrap();
        let (values, types, row_start, len_delta, payload) = parse_block(&data);
        assert_eq!(values, vec![5, 9]);
        assert_eq!(types, vec![Packing::RowBlock, Packing::RowBlock]);
        assert!(len_delta);

        let mut pos = row_start[0] as usize;
        assert_eq!(decode_rowid_block(&payload, &mut pos), vec![10, 20]);
        assert_eq!(pos, row_start[1] as usize);
        assert_eq!(decode_rowid_block(&payload, &mut pos), vec![30, 31]);
    }

    #[test]
    fn test_float_groups_merge_within_tolerance() {
        let tmp = TempDir::new().unwrap();
        let mut s = sinks(&tmp);
        let mut w = RowBlockWriter::<u32>::new(true).unwrap();

        let one = 1.0f32;
        let one_ulp = f32::from_bits(one.to_bits() + 1);
        w.add_value(one.to_bits(), 0);
        w.next_value(one_ulp.to_bits(), 1, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        w.next_value(2.0f32.to_bits(), 2, &mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        w.finish(&mut s.dst, &mut s.blocks_off, &mut s.pgm_values);
        s.dst.close().unwrap();

        let data = std::fs::read(tmp.path().join("out")).unwrap();
        let (values, types, _, _, _) = parse_block(&data);
        assert_eq!(values.len(), 2);
        assert_eq!(values[0], one.to_bits());
        assert_eq!(types, vec![Packing::RowBlock, Packing::Row]);
    }
}
