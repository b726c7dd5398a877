mod delta;
mod intcodec;
mod pgm;
pub(crate) mod varint;

pub use delta::{DeltaInt, compute_deltas, restore_deltas};
pub use intcodec::{CODEC_BLOCK_SIZE, IntCodec, Pfor128Codec, create_int_codec};
pub use pgm::{ApproxPos, PGM_EPSILON, PgmIndex, PgmKey};
pub use varint::{MAX_PACKED_LEN, pack, pack_into, packed_len, unpack};
