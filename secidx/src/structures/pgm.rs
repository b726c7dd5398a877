//! Piecewise-geometric model over a sorted key sequence.
//!
//! Built in one streaming pass: a shrinking slope cone absorbs points while
//! every prediction stays within ±epsilon positions of the truth, and a new
//! segment starts the moment the cone empties. The serialized bytes are what
//! the builder appends to the index file's PGM stream; `load`/`search`
//! realize the symmetric read path.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io;

/// Maximum |predicted − actual| position error, in entries.
pub const PGM_EPSILON: u64 = 64;

/// Key types the model is built over. Ordering must be preserved by the f64
/// mapping; raw bits give a lossless serialized form.
pub trait PgmKey: Copy + PartialOrd {
    fn to_f64(self) -> f64;
    fn to_bits64(self) -> u64;
    fn from_bits64(bits: u64) -> Self;
}

impl PgmKey for u32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn to_bits64(self) -> u64 {
        self as u64
    }
    fn from_bits64(bits: u64) -> Self {
        bits as u32
    }
}

impl PgmKey for u64 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn to_bits64(self) -> u64 {
        self
    }
    fn from_bits64(bits: u64) -> Self {
        bits
    }
}

impl PgmKey for i64 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn to_bits64(self) -> u64 {
        self as u64
    }
    fn from_bits64(bits: u64) -> Self {
        bits as i64
    }
}

impl PgmKey for f32 {
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn to_bits64(self) -> u64 {
        self.to_bits() as u64
    }
    fn from_bits64(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

/// Approximate location of a key: the true position is within `[lo, hi]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApproxPos {
    pub lo: u64,
    pub hi: u64,
    pub pos: u64,
}

/// One linear segment: predicts `pos0 + slope * (x - x0)` for keys at or
/// after its first key.
#[derive(Debug, Clone, Copy)]
struct PgmSegment {
    first_key: f64,
    first_key_bits: u64,
    slope: f64,
    pos0: u64,
}

/// A built model over `n_keys` sorted keys.
#[derive(Debug, Clone)]
pub struct PgmIndex<K: PgmKey> {
    n_keys: u64,
    epsilon: u64,
    segments: Vec<PgmSegment>,
    _marker: std::marker::PhantomData<K>,
}

impl<K: PgmKey> PgmIndex<K> {
    /// Build from an ascending key sequence.
    pub fn build_from_sorted(keys: &[K]) -> Self {
        let mut segments = Vec::new();
        if !keys.is_empty() {
            let mut x0 = keys[0].to_f64();
            let mut bits0 = keys[0].to_bits64();
            let mut pos0 = 0u64;
            let mut lo = f64::NEG_INFINITY;
            let mut hi = f64::INFINITY;
            let eps = PGM_EPSILON as f64;

            for (i, key) in keys.iter().enumerate().skip(1) {
                let x = key.to_f64();
                let y = i as f64;
                let dx = x - x0;
                if dx <= 0.0 {
                    // f64-collapsed neighbor; cannot constrain the cone
                    continue;
                }
                let y0 = pos0 as f64;
                let cand_lo = (y - eps - y0) / dx;
                let cand_hi = (y + eps - y0) / dx;
                if cand_lo.max(lo) > cand_hi.min(hi) {
                    segments.push(close_segment(x0, bits0, pos0, lo, hi));
                    x0 = x;
                    bits0 = key.to_bits64();
                    pos0 = i as u64;
                    lo = f64::NEG_INFINITY;
                    hi = f64::INFINITY;
                } else {
                    lo = lo.max(cand_lo);
                    hi = hi.min(cand_hi);
                }
            }
            segments.push(close_segment(x0, bits0, pos0, lo, hi));
        }

        Self {
            n_keys: keys.len() as u64,
            epsilon: PGM_EPSILON,
            segments,
            _marker: std::marker::PhantomData,
        }
    }

    /// Predicted position range for `key`.
    pub fn search(&self, key: K) -> ApproxPos {
        if self.n_keys == 0 {
            return ApproxPos { lo: 0, hi: 0, pos: 0 };
        }
        let x = key.to_f64();
        // last segment whose first key is <= x
        let idx = match self
            .segments
            .partition_point(|seg| seg.first_key <= x)
        {
            0 => 0,
            n => n - 1,
        };
        let seg = &self.segments[idx];
        let predicted = seg.pos0 as f64 + seg.slope * (x - seg.first_key);
        let max_pos = self.n_keys - 1;
        let pos = (predicted.round().max(0.0) as u64).min(max_pos);
        ApproxPos {
            lo: pos.saturating_sub(self.epsilon),
            hi: (pos + self.epsilon).min(max_pos),
            pos,
        }
    }

    pub fn n_keys(&self) -> u64 {
        self.n_keys
    }

    pub fn n_segments(&self) -> usize {
        self.segments.len()
    }

    /// Serialize into `out`.
    pub fn save(&self, out: &mut Vec<u8>) {
        out.write_u64::<LittleEndian>(self.n_keys).unwrap();
        out.write_u32::<LittleEndian>(self.epsilon as u32).unwrap();
        out.write_u32::<LittleEndian>(self.segments.len() as u32)
            .unwrap();
        for seg in &self.segments {
            out.write_u64::<LittleEndian>(seg.first_key_bits).unwrap();
            out.write_f64::<LittleEndian>(seg.slope).unwrap();
            out.write_u64::<LittleEndian>(seg.pos0).unwrap();
        }
    }

    /// Inverse of `save`.
    pub fn load(mut data: &[u8]) -> io::Result<Self> {
        let n_keys = data.read_u64::<LittleEndian>()?;
        let epsilon = data.read_u32::<LittleEndian>()? as u64;
        let n_segments = data.read_u32::<LittleEndian>()? as usize;
        let mut segments = Vec::with_capacity(n_segments);
        for _ in 0..n_segments {
            let first_key_bits = data.read_u64::<LittleEndian>()?;
            let slope = data.read_f64::<LittleEndian>()?;
            let pos0 = data.read_u64::<LittleEndian>()?;
            segments.push(PgmSegment {
                first_key: K::from_bits64(first_key_bits).to_f64(),
                first_key_bits,
                slope,
                pos0,
            });
        }
        Ok(Self {
            n_keys,
            epsilon,
            segments,
            _marker: std::marker::PhantomData,
        })
    }
}

fn close_segment(x0: f64, bits0: u64, pos0: u64, lo: f64, hi: f64) -> PgmSegment {
    let slope = if lo.is_finite() && hi.is_finite() {
        (lo + hi) / 2.0
    } else if hi.is_finite() {
        hi
    } else if lo.is_finite() {
        lo
    } else {
        0.0
    };
    PgmSegment {
        first_key: x0,
        first_key_bits: bits0,
        slope,
        pos0,
    }
}
