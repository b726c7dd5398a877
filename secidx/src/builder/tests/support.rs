//! Test-side reader for the emitted index file: parses the header, META,
//! the PGM and block-offsets streams, and decodes value blocks back into
//! groups through the same codec/delta/varint primitives the writer used.

use std::path::Path;

use crate::builder::Packing;
use crate::structures::{IntCodec, create_int_codec, restore_deltas, unpack};

/// Byte cursor over the file image.
pub struct Cur<'a> {
    data: &'a [u8],
    pub pos: usize,
}

impl<'a> Cur<'a> {
    pub fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub fn u8(&mut self) -> u8 {
        let v = self.data[self.pos];
        self.pos += 1;
        v
    }

    pub fn u32(&mut self) -> u32 {
        let v = u32::from_le_bytes(self.data[self.pos..self.pos + 4].try_into().unwrap());
        self.pos += 4;
        v
    }

    pub fn u64(&mut self) -> u64 {
        let v = u64::from_le_bytes(self.data[self.pos..self.pos + 8].try_into().unwrap());
        self.pos += 8;
        v
    }

    pub fn varint(&mut self) -> u64 {
        let (v, n) = unpack(&self.data[self.pos..]).unwrap();
        self.pos += n;
        v
    }

    pub fn string(&mut self) -> String {
        let len = self.varint() as usize;
        let s = String::from_utf8(self.data[self.pos..self.pos + len].to_vec()).unwrap();
        self.pos += len;
        s
    }

    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        let b = self.data[self.pos..self.pos + len].to_vec();
        self.pos += len;
        b
    }

    /// Varint word count followed by that many raw u32 words.
    pub fn words(&mut self) -> Vec<u32> {
        let count = self.varint() as usize;
        let mut words = Vec::with_capacity(count);
        for _ in 0..count {
            words.push(self.u32());
        }
        words
    }
}

pub struct AttrMeta {
    pub name: String,
    pub src_attr: u32,
    pub attr: u32,
    pub attr_type: u32,
}

pub struct ValueGroup {
    pub value: u64,
    pub packing: Packing,
    pub rowids: Vec<u32>,
}

pub struct BlockData {
    pub values: Vec<u64>,
    pub len_delta: bool,
    pub groups: Vec<ValueGroup>,
}

pub struct IndexFile {
    pub data: Vec<u8>,
    pub version: u32,
    pub meta_off: u64,
    pub enabled_words: Vec<u32>,
    pub codec_u32: String,
    pub codec_u64: String,
    pub collation: u32,
    pub values_per_block: u32,
    pub attrs: Vec<AttrMeta>,
    pub blocks_off_deltas: Vec<u64>,
    pub blocks_off_start: Vec<u64>,
    pub blocks_count: Vec<u64>,
    pub pgm_blobs: Vec<Vec<u8>>,
    /// File offset where the blocks-off stream begins.
    pub blocks_off_stream: usize,
}

impl IndexFile {
    pub fn parse(path: &Path) -> Self {
        let data = std::fs::read(path).unwrap();
        let mut cur = Cur::new(&data, 0);
        let version = cur.u32();
        let meta_off = cur.u64();

        cur = Cur::new(&data, meta_off as usize);
        let next_meta = cur.u64();
        assert_eq!(next_meta, 0, "single-meta files only");
        let n_attrs = cur.u32() as usize;

        let mut enabled_words = Vec::new();
        for _ in 0..n_attrs.div_ceil(32) {
            enabled_words.push(cur.u32());
        }

        let codec_u32 = cur.string();
        let codec_u64 = cur.string();
        let collation = cur.u32();
        let values_per_block = cur.u32();

        let mut attrs = Vec::with_capacity(n_attrs);
        for _ in 0..n_attrs {
            attrs.push(AttrMeta {
                name: cur.string(),
                src_attr: cur.varint() as u32,
                attr: cur.varint() as u32,
                attr_type: cur.varint() as u32,
            });
        }

        let n = cur.varint() as usize;
        let blocks_off_deltas: Vec<u64> = (0..n).map(|_| cur.varint()).collect();
        let mut blocks_off_start = blocks_off_deltas.clone();
        restore_deltas(&mut blocks_off_start);

        let n = cur.varint() as usize;
        let blocks_count: Vec<u64> = (0..n).map(|_| cur.varint()).collect();

        // PGM stream follows META immediately
        let mut pgm_blobs = Vec::with_capacity(n_attrs);
        for _ in 0..n_attrs {
            let len = cur.varint() as usize;
            pgm_blobs.push(cur.bytes(len));
        }

        let blocks_off_stream = cur.pos;

        Self {
            version,
            meta_off,
            enabled_words,
            codec_u32,
            codec_u64,
            collation,
            values_per_block,
            attrs,
            blocks_off_deltas,
            blocks_off_start,
            blocks_count,
            pgm_blobs,
            blocks_off_stream,
            data,
        }
    }

    fn codec(&self) -> Box<dyn IntCodec> {
        create_int_codec(&self.codec_u32, &self.codec_u64).unwrap()
    }

    /// True when the attribute's values travel on the u64 lane.
    pub fn is_u64_lane(attr_type: u32) -> bool {
        // STRING, INT64, INT64SET
        matches!(attr_type, 3 | 4 | 6)
    }

    /// Absolute file offsets of one attribute's value blocks, read from its
    /// slice of the blocks-off stream.
    pub fn attr_block_offsets(&self, attr: usize) -> Vec<u64> {
        let region_start = self.blocks_off_stream + self.blocks_off_start[attr] as usize;
        let region_end = if attr + 1 < self.blocks_off_start.len() {
            self.blocks_off_stream + self.blocks_off_start[attr + 1] as usize
        } else {
            self.data.len()
        };
        let mut cur = Cur::new(&self.data, region_start);
        let mut offsets = Vec::new();
        while cur.pos < region_end {
            offsets.push(cur.u64());
        }
        offsets
    }

    /// Decode every value block of one attribute.
    pub fn blocks(&self, attr: usize) -> Vec<BlockData> {
        let u64_lane = Self::is_u64_lane(self.attrs[attr].attr_type);
        self.attr_block_offsets(attr)
            .iter()
            .map(|&off| self.parse_block(off as usize, u64_lane))
            .collect()
    }

    /// All value groups of one attribute, in file order.
    pub fn groups(&self, attr: usize) -> Vec<ValueGroup> {
        self.blocks(attr).into_iter().flat_map(|b| b.groups).collect()
    }

    fn parse_block(&self, off: usize, u64_lane: bool) -> BlockData {
        let codec = self.codec();
        let mut cur = Cur::new(&self.data, off);

        let words = cur.words();
        let values: Vec<u64> = if u64_lane {
            let mut v = Vec::new();
            codec.decode_u64(&words, &mut v);
            restore_deltas(&mut v);
            v
        } else {
            let mut v = Vec::new();
            codec.decode_u32(&words, &mut v);
            restore_deltas(&mut v);
            v.into_iter().map(u64::from).collect()
        };

        let words = cur.words();
        let mut types = Vec::new();
        codec.decode_u32(&words, &mut types);

        let len_delta = cur.u8() != 0;
        let words = cur.words();
        let mut row_start = Vec::new();
        codec.decode_u32(&words, &mut row_start);
        if len_delta {
            restore_deltas(&mut row_start);
        }

        assert_eq!(values.len(), types.len());
        assert_eq!(values.len(), row_start.len());
        assert!(!values.is_empty() && values.len() <= self.values_per_block as usize);

        let payload_start = cur.pos;
        let groups = values
            .iter()
            .zip(types.iter().zip(row_start.iter()))
            .map(|(&value, (&ty, &start))| {
                let packing = Packing::from_u32(ty).unwrap();
                let rowids = match packing {
                    Packing::Row => vec![start],
                    Packing::RowBlock => {
                        let mut cur = Cur::new(&self.data, payload_start + start as usize);
                        decode_rowid_block(&mut cur, &*codec)
                    }
                    Packing::RowBlocksList => {
                        let mut cur = Cur::new(&self.data, payload_start + start as usize);
                        let blocks = cur.varint() as usize;
                        let mut rowids = Vec::new();
                        for _ in 0..blocks {
                            rowids.extend(decode_rowid_block(&mut cur, &*codec));
                        }
                        rowids
                    }
                };
                ValueGroup {
                    value,
                    packing,
                    rowids,
                }
            })
            .collect();

        BlockData {
            values,
            len_delta,
            groups,
        }
    }
}

/// One encoded rowid block: varint min, varint span, word-count-prefixed
/// delta+codec rowids.
pub fn decode_rowid_block(cur: &mut Cur<'_>, codec: &dyn IntCodec) -> Vec<u32> {
    let min = cur.varint() as u32;
    let span = cur.varint() as u32;
    let words = cur.words();
    let mut rowids = Vec::new();
    codec.decode_u32(&words, &mut rowids);
    restore_deltas(&mut rowids);
    assert_eq!(rowids.first().copied(), Some(min));
    assert_eq!(rowids.last().copied(), Some(min + span));
    rowids
}
