//! Memory pools and interners of the osier front end.
//!
//! Every collection in this crate hands out stable offsets or dense ids
//! instead of references. Records are immutable once published and live until
//! the owning pool is dropped, so client pools are free to persist ids across
//! arbitrary later insertions.

#![warn(missing_docs)]
#![deny(unused_must_use)]

mod alloc;
mod identifier;
mod index_map;
mod reserved;

pub use alloc::{AllocPool, Allocation};
pub use identifier::{IdentifierEntry, IdentifierId, IdentifierPool};
pub use index_map::{IndexMap, PoolValue};
pub use reserved::ReservedVec;

/// Starting state of the 32-bit FNV-1a hash.
pub const FNV1A_SEED: u32 = 0x811c_9dc5;

/// Folds `bytes` into a running 32-bit FNV-1a state.
///
/// Lets callers hash logically concatenated inputs (e.g. a tag byte followed
/// by a structure image) without materializing the concatenation.
pub fn fnv1a_with(mut hash: u32, bytes: &[u8]) -> u32 {
    const PRIME: u32 = 0x0100_0193;

    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(PRIME);
    }

    hash
}

/// 32-bit FNV-1a over raw bytes.
///
/// This is the hash every interning pool keys on; it is part of the stored
/// record format, so it must stay byte-for-byte stable.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    fnv1a_with(FNV1A_SEED, bytes)
}
