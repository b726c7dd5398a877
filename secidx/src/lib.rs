//! secidx - secondary-index builder for a columnar search engine
//!
//! Turns a stream of typed attribute values tagged with ascending rowids
//! into one on-disk index file mapping values back to rowid sets:
//! - Out-of-core construction: bounded raw buffers spill sorted runs,
//!   finalized by a K-way priority-queue merge per attribute
//! - Value blocks of up to 128 groups, delta + block-codec encoded, with
//!   three rowid packing modes chosen per group
//! - A learned (piecewise-geometric) position index per attribute for
//!   approximate value lookup
//! - Collation-hashed string keys, tolerant float equality, multi-valued
//!   (set) attributes
//! - Single self-describing output file: header, value blocks, META, PGM
//!   stream, block-offsets stream

pub mod builder;
pub mod collation;
pub mod error;
pub mod io;
pub mod schema;
pub mod structures;

pub use builder::{
    Builder, BuilderConfig, CODEC_NAME_U32, CODEC_NAME_U64, LIB_VERSION, Packing,
    STORAGE_VERSION, VALUES_PER_BLOCK, float_equal, lib_version, storage_version,
};
pub use collation::{StrHashFn, install_collations};
pub use error::{Error, Result};
pub use schema::{AttrType, Collation, SourceAttr};

/// Dense 32-bit row identifier, monotonically non-decreasing during
/// ingestion.
pub type RowId = u32;
