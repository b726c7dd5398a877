//! Block-oriented integer codec behind the `IntCodec` seam.
//!
//! The builder treats the codec as an injected collaborator addressed by the
//! two codec-name strings recorded in META. The in-tree binding packs values
//! in 128-integer blocks: a count word, then per block one bit-width word
//! followed by the horizontally bitpacked payload. Both lane widths (u32 and
//! u64) share the u32 word stream.

use crate::error::{Error, Result};

/// Values per packed block.
pub const CODEC_BLOCK_SIZE: usize = 128;

/// Block codec over u32 word streams. Encode appends to `dst` (callers clear
/// it); decode appends the recovered values.
pub trait IntCodec {
    fn encode_u32(&self, src: &[u32], dst: &mut Vec<u32>);
    fn decode_u32(&self, src: &[u32], dst: &mut Vec<u32>);
    fn encode_u64(&self, src: &[u64], dst: &mut Vec<u32>);
    fn decode_u64(&self, src: &[u32], dst: &mut Vec<u64>);
}

/// Resolve a codec from the two META codec-name strings.
pub fn create_int_codec(name_u32: &str, name_u64: &str) -> Result<Box<dyn IntCodec>> {
    match (name_u32, name_u64) {
        ("simdfastpfor128", "fastpfor128") => Ok(Box::new(Pfor128Codec)),
        _ => Err(Error::Codec(format!(
            "unknown codec pair: {name_u32}/{name_u64}"
        ))),
    }
}

/// Minimum bits that represent `v`.
#[inline]
fn bits_needed_u64(v: u64) -> u32 {
    64 - v.leading_zeros()
}

/// 128-value block bitpacking codec.
pub struct Pfor128Codec;

impl IntCodec for Pfor128Codec {
    fn encode_u32(&self, src: &[u32], dst: &mut Vec<u32>) {
        dst.push(src.len() as u32);
        for chunk in src.chunks(CODEC_BLOCK_SIZE) {
            let bits = chunk
                .iter()
                .map(|&v| bits_needed_u64(v as u64))
                .max()
                .unwrap_or(0);
            dst.push(bits);
            pack_words(chunk.iter().map(|&v| v as u64), bits, dst);
        }
    }

    fn decode_u32(&self, src: &[u32], dst: &mut Vec<u32>) {
        decode_stream(src, |v| dst.push(v as u32));
    }

    fn encode_u64(&self, src: &[u64], dst: &mut Vec<u32>) {
        dst.push(src.len() as u32);
        for chunk in src.chunks(CODEC_BLOCK_SIZE) {
            let bits = chunk.iter().map(|&v| bits_needed_u64(v)).max().unwrap_or(0);
            dst.push(bits);
            pack_words(chunk.iter().copied(), bits, dst);
        }
    }

    fn decode_u64(&self, src: &[u32], dst: &mut Vec<u64>) {
        decode_stream(src, |v| dst.push(v));
    }
}

/// Bitpack `values` at `bits` bits each into u32 words, LSB-first.
fn pack_words(values: impl Iterator<Item = u64>, bits: u32, dst: &mut Vec<u32>) {
    if bits == 0 {
        return;
    }
    let mut acc: u128 = 0;
    let mut acc_bits: u32 = 0;
    for v in values {
        acc |= (v as u128) << acc_bits;
        acc_bits += bits;
        while acc_bits >= 32 {
            dst.push(acc as u32);
            acc >>= 32;
            acc_bits -= 32;
        }
    }
    if acc_bits > 0 {
        dst.push(acc as u32);
    }
}

/// Walk the encoded stream, feeding every recovered value to `emit`.
fn decode_stream(src: &[u32], mut emit: impl FnMut(u64)) {
    let Some((&count, mut rest)) = src.split_first() else {
        return;
    };
    let mut remaining = count as usize;
    while remaining > 0 {
        let chunk_len = remaining.min(CODEC_BLOCK_SIZE);
        let Some((&bits, tail)) = rest.split_first() else {
            return;
        };
        rest = tail;
        if bits == 0 {
            for _ in 0..chunk_len {
                emit(0);
            }
        } else {
            let mask: u128 = if bits >= 64 {
                u64::MAX as u128
            } else {
                (1u128 << bits) - 1
            };
            let mut acc: u128 = 0;
            let mut acc_bits: u32 = 0;
            let mut word = 0usize;
            for _ in 0..chunk_len {
                while acc_bits < bits {
                    let w = rest.get(word).copied().unwrap_or(0);
                    acc |= (w as u128) << acc_bits;
                    word += 1;
                    acc_bits += 32;
                }
                emit((acc & mask) as u64);
                acc >>= bits;
                acc_bits -= bits;
            }
            let words = (chunk_len as u32 * bits).div_ceil(32) as usize;
            rest = &rest[words.min(rest.len())..];
        }
        remaining -= chunk_len;
    }
}
