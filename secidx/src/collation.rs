//! Collation hash functions for string attributes.
//!
//! STRING values are never stored verbatim: a collation-specific hash maps
//! the bytes to a 64-bit key, and equality on that key defines value
//! equality for the index. The table of hash functions is process-wide and
//! installed at most once; before (or without) an install the built-in
//! defaults apply.

use std::hash::Hasher;
use std::sync::OnceLock;

use rustc_hash::FxHasher;

use crate::schema::{COLLATIONS_TOTAL, Collation};

/// A collation hash: raw bytes in, 64-bit storage key out.
pub type StrHashFn = fn(&[u8]) -> u64;

static COLLATIONS: OnceLock<[StrHashFn; COLLATIONS_TOTAL]> = OnceLock::new();

/// Install a custom collation-hash table. May be called at most once, before
/// any builder runs; returns false if a table was already installed.
pub fn install_collations(table: [StrHashFn; COLLATIONS_TOTAL]) -> bool {
    COLLATIONS.set(table).is_ok()
}

/// Resolve the hash function for a collation.
pub fn hash_fn(collation: Collation) -> StrHashFn {
    let table = COLLATIONS.get_or_init(|| {
        [
            hash_libc_ci,
            hash_bytes,
            hash_utf8_general_ci,
            hash_bytes,
        ]
    });
    table[collation as u32 as usize]
}

fn fx_hash(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write(bytes);
    hasher.finish()
}

/// Case-sensitive collations (LIBC_CS, BINARY) hash the bytes as-is.
fn hash_bytes(bytes: &[u8]) -> u64 {
    fx_hash(bytes)
}

/// LIBC_CI folds ASCII case only, byte by byte.
fn hash_libc_ci(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    for &b in bytes {
        hasher.write_u8(b.to_ascii_lowercase());
    }
    hasher.finish()
}

/// UTF8_GENERAL_CI applies a Unicode lowercase fold. Invalid UTF-8 is
/// replaced, matching lossy decoding on the read side.
fn hash_utf8_general_ci(bytes: &[u8]) -> u64 {
    let text = String::from_utf8_lossy(bytes);
    let mut hasher = FxHasher::default();
    for ch in text.chars().flat_map(char::to_lowercase) {
        let mut buf = [0u8; 4];
        hasher.write(ch.encode_utf8(&mut buf).as_bytes());
    }
    hasher.finish()
}
