//! Identifier interning.

use core::fmt;

use crate::index_map::{IndexMap, PoolValue};
use crate::fnv1a;

/// Dense 32-bit id of an interned identifier.
///
/// Equal byte sequences always intern to the same id. [`IdentifierId::INVALID`]
/// is reserved and never produced by a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct IdentifierId(u32);

impl IdentifierId {
    /// Reserved sentinel for "no identifier".
    pub const INVALID: IdentifierId = IdentifierId(u32::MAX);

    /// Raw id constructor.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit value.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Whether this id is the reserved sentinel.
    pub const fn is_invalid(self) -> bool {
        self.0 == u32::MAX
    }
}

impl fmt::Display for IdentifierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "IdentifierId<INVALID>")
        } else {
            write!(f, "IdentifierId<{}>", self.0)
        }
    }
}

/// Immutable view of an interned identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierEntry<'a> {
    hash: u32,
    bytes: &'a [u8],
}

impl<'a> IdentifierEntry<'a> {
    /// The FNV-1a hash stored with the entry.
    pub const fn hash(&self) -> u32 {
        self.hash
    }

    /// The interned byte sequence.
    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

/// Value-store record: `[hash: u32][length: u32][bytes, stride-padded]`.
struct IdentifierRecord;

const HEADER_STRIDES: u32 = 2;

impl PoolValue for IdentifierRecord {
    type Key<'a> = &'a [u8];

    const STRIDE_BYTES: usize = 4;

    fn hash_key(key: &[u8]) -> u32 {
        fnv1a(key)
    }

    fn required_strides(key: &[u8]) -> u32 {
        let data_strides = (key.len() as u32).div_ceil(Self::STRIDE_BYTES as u32);

        HEADER_STRIDES + data_strides
    }

    fn write_new(dst: &mut [u8], key: &[u8], hash: u32) {
        dst[0..4].copy_from_slice(&hash.to_le_bytes());
        dst[4..8].copy_from_slice(&(key.len() as u32).to_le_bytes());
        dst[8..8 + key.len()].copy_from_slice(key);
    }

    fn used_strides(record: &[u8]) -> u32 {
        let len = u32::from_le_bytes(record[4..8].try_into().expect("record length"));

        HEADER_STRIDES + len.div_ceil(Self::STRIDE_BYTES as u32)
    }

    fn stored_hash(record: &[u8]) -> u32 {
        u32::from_le_bytes(record[0..4].try_into().expect("record hash"))
    }

    fn matches(record: &[u8], key: &[u8], hash: u32) -> bool {
        if Self::stored_hash(record) != hash {
            return false;
        }

        let len = u32::from_le_bytes(record[4..8].try_into().expect("record length")) as usize;

        len == key.len() && &record[8..8 + len] == key
    }
}

/// Interns identifier byte strings to dense [`IdentifierId`]s.
pub struct IdentifierPool {
    map: IndexMap<IdentifierRecord>,
}

impl IdentifierPool {
    /// Creates a pool with defaults sized for a single compilation unit.
    pub fn new() -> Self {
        Self::with_capacity(1 << 22, 1 << 10, 1 << 26, 1 << 16)
    }

    /// Creates a pool with explicit lookup and value-store sizing; see
    /// [`IndexMap::new`].
    pub fn with_capacity(
        lookup_capacity: usize,
        lookup_commit: usize,
        value_reserve_bytes: usize,
        value_commit_bytes: usize,
    ) -> Self {
        Self {
            map: IndexMap::new(
                lookup_capacity,
                lookup_commit,
                value_reserve_bytes,
                value_commit_bytes,
            ),
        }
    }

    /// Interns `bytes`, returning its dense id.
    pub fn index_from(&mut self, bytes: &[u8]) -> IdentifierId {
        IdentifierId(self.map.index_from(bytes))
    }

    /// Resolves an id produced by this pool.
    pub fn entry_from_id(&self, id: IdentifierId) -> IdentifierEntry<'_> {
        assert!(!id.is_invalid(), "attempted to resolve IdentifierId::INVALID");

        let record = self.map.value_from(id.0);

        let hash = u32::from_le_bytes(record[0..4].try_into().expect("record hash"));
        let len = u32::from_le_bytes(record[4..8].try_into().expect("record length")) as usize;

        IdentifierEntry {
            hash,
            bytes: &record[8..8 + len],
        }
    }

    /// Number of distinct identifiers interned.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the pool holds no identifiers.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for IdentifierPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for IdentifierPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifierPool")
            .field("len", &self.len())
            .finish()
    }
}
