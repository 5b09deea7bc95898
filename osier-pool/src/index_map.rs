//! Open-addressing Robin-Hood table with a stable out-of-line value store.

use core::marker::PhantomData;

use crate::reserved::ReservedVec;

/// Storage contract between [`IndexMap`] and its value type.
///
/// Values are self-describing records in a byte store addressed in strides of
/// [`PoolValue::STRIDE_BYTES`]. A record must embed its own hash and length so
/// the table can re-walk the store during a rehash.
pub trait PoolValue {
    /// Borrowed key form used for lookup and initialization.
    type Key<'a>: Copy;

    /// Bytes per stride of the value store.
    const STRIDE_BYTES: usize;

    /// Stable 32-bit hash of a key.
    fn hash_key(key: Self::Key<'_>) -> u32;

    /// Number of strides a freshly inserted record for `key` occupies.
    fn required_strides(key: Self::Key<'_>) -> u32;

    /// Writes the record for `key` into `dst` (exactly `required_strides`
    /// strides long, zero-initialized).
    fn write_new(dst: &mut [u8], key: Self::Key<'_>, hash: u32);

    /// Number of strides the record beginning at `record` occupies.
    fn used_strides(record: &[u8]) -> u32;

    /// The hash embedded in the record beginning at `record`.
    fn stored_hash(record: &[u8]) -> u32;

    /// Structural equality between a stored record and a probe key.
    fn matches(record: &[u8], key: Self::Key<'_>, hash: u32) -> bool;
}

const DISTANCE_BITS: u32 = 10;
const HASH_BITS: u32 = 16 - DISTANCE_BITS;
const DISTANCE_ONE: u16 = 1 << HASH_BITS;
const DISTANCE_MASK: u16 = ((1 << DISTANCE_BITS) - 1) << HASH_BITS;
const HASH_MASK: u16 = !DISTANCE_MASK;

fn create_lookup(key_hash: u32) -> u16 {
    let lookup = (key_hash >> (32 - HASH_BITS)) as u16 & HASH_MASK;

    // 0 means "empty slot"; remap a computed 0 so it stays distinguishable.
    if lookup == 0 {
        1
    } else {
        lookup
    }
}

/// Lookup-or-insert hash table keyed on compressed hashes.
///
/// Two parallel tables (`lookups`, `offsets`) form the index; records live in
/// a separate [`ReservedVec`] and never move once inserted. Each 16-bit
/// lookup word packs a 10-bit probe distance (high bits) and a 6-bit
/// compressed hash (low bits). Collisions resolve Robin-Hood style: the entry
/// with the smaller distance keeps the slot.
///
/// Exceeding the maximum probe distance (1023) triggers a rehash into a
/// doubled lookup table; running out of lookup or value reservation is fatal.
#[derive(Debug)]
pub struct IndexMap<V: PoolValue> {
    lookups: Vec<u16>,
    offsets: Vec<u32>,
    lookup_used: u32,
    lookup_capacity: usize,
    values: ReservedVec,
    value_used_strides: u32,
    _values: PhantomData<V>,
}

impl<V: PoolValue> IndexMap<V> {
    /// Creates a table with `lookup_commit` initial slots, growable up to
    /// `lookup_capacity`, over a `value_reserve_bytes` value reservation
    /// committed in `value_commit_bytes` steps.
    pub fn new(
        lookup_capacity: usize,
        lookup_commit: usize,
        value_reserve_bytes: usize,
        value_commit_bytes: usize,
    ) -> Self {
        assert!(
            lookup_capacity.is_power_of_two() && lookup_commit.is_power_of_two(),
            "IndexMap lookup sizes must be powers of two"
        );
        assert!(
            lookup_commit <= lookup_capacity,
            "IndexMap initial lookup commit {lookup_commit} exceeds capacity {lookup_capacity}"
        );

        Self {
            lookups: vec![0; lookup_commit],
            offsets: vec![0; lookup_commit],
            lookup_used: 0,
            lookup_capacity,
            values: ReservedVec::new(value_reserve_bytes, value_commit_bytes),
            value_used_strides: 0,
            _values: PhantomData,
        }
    }

    /// Number of distinct entries inserted so far.
    pub fn len(&self) -> usize {
        self.lookup_used as usize
    }

    /// Whether the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lookup_used == 0
    }

    /// Record bytes from stride offset `offset` to the end of the store.
    ///
    /// Records are self-describing; callers slice off the prefix they need.
    pub fn value_from(&self, offset: u32) -> &[u8] {
        assert!(
            offset < self.value_used_strides,
            "IndexMap value offset {offset} out of bounds"
        );

        let begin = offset as usize * V::STRIDE_BYTES;

        &self.values.as_bytes()[begin..]
    }

    /// Total strides in use by the value store.
    pub fn used_strides(&self) -> u32 {
        self.value_used_strides
    }

    /// Looks `key` up, inserting a fresh record on miss. Returns the record's
    /// stride offset, which never changes afterwards.
    pub fn index_from(&mut self, key: V::Key<'_>) -> u32 {
        let hash = V::hash_key(key);

        self.index_from_hashed(key, hash)
    }

    fn index_from_hashed(&mut self, key: V::Key<'_>, hash: u32) -> u32 {
        if self.lookup_used as usize * 4 > self.lookups.len() * 3 {
            self.rehash();
        }

        let mut index = hash as usize & (self.lookups.len() - 1);
        let mut wanted = create_lookup(hash);
        let mut offset_to_insert = 0u32;
        let mut new_value_offset: Option<u32> = None;

        loop {
            let curr = self.lookups[index];

            if curr == 0 {
                self.lookups[index] = wanted;

                if new_value_offset.is_none() {
                    let offset = self.create_value(key, hash);
                    new_value_offset = Some(offset);
                    offset_to_insert = offset;
                }

                self.offsets[index] = offset_to_insert;
                self.lookup_used += 1;

                return new_value_offset.expect("value created above");
            } else if curr == wanted {
                let existing = self.offsets[index];

                if V::matches(self.value_from(existing), key, hash) {
                    return existing;
                }
            } else if (curr & DISTANCE_MASK) < (wanted & DISTANCE_MASK) {
                // Robin Hood: the richer entry moves on, the poorer one stays.
                let displaced = self.offsets[index];

                self.lookups[index] = wanted;

                if new_value_offset.is_none() {
                    let offset = self.create_value(key, hash);
                    new_value_offset = Some(offset);
                    offset_to_insert = offset;
                }

                self.offsets[index] = offset_to_insert;

                wanted = curr;
                offset_to_insert = displaced;
            }

            index = if index == self.lookups.len() - 1 {
                0
            } else {
                index + 1
            };

            if (wanted & DISTANCE_MASK) == DISTANCE_MASK {
                self.rehash();

                return match new_value_offset {
                    Some(offset) => offset,
                    None => self.index_from_hashed(key, hash),
                };
            }

            wanted += DISTANCE_ONE;
        }
    }

    fn create_value(&mut self, key: V::Key<'_>, hash: u32) -> u32 {
        let strides = V::required_strides(key);
        let bytes = strides as usize * V::STRIDE_BYTES;

        let byte_offset = self.values.reserve_exact(bytes);

        let offset = self.value_used_strides;
        self.value_used_strides += strides;

        V::write_new(self.values.bytes_at_mut(byte_offset, bytes), key, hash);

        offset
    }

    fn rehash(&mut self) {
        if self.lookups.len() == self.lookup_capacity {
            panic!(
                "IndexMap lookup capacity of {} slots exhausted",
                self.lookup_capacity
            );
        }

        let doubled = self.lookups.len() * 2;

        self.lookups = vec![0; doubled];
        self.offsets = vec![0; doubled];

        let mut offset = 0u32;

        while offset != self.value_used_strides {
            let record = self.value_from(offset);
            let used = V::used_strides(record);
            let hash = V::stored_hash(record);

            self.reinsert(offset, hash);

            offset += used;
        }
    }

    fn reinsert(&mut self, mut offset_to_insert: u32, key_hash: u32) {
        let mut index = key_hash as usize & (self.lookups.len() - 1);
        let mut wanted = create_lookup(key_hash);

        loop {
            let curr = self.lookups[index];

            if curr == 0 {
                self.lookups[index] = wanted;
                self.offsets[index] = offset_to_insert;

                return;
            } else if (curr & DISTANCE_MASK) < (wanted & DISTANCE_MASK) {
                let displaced = self.offsets[index];

                self.lookups[index] = wanted;
                self.offsets[index] = offset_to_insert;

                wanted = curr;
                offset_to_insert = displaced;
            }

            index = if index == self.lookups.len() - 1 {
                0
            } else {
                index + 1
            };

            if (wanted & DISTANCE_MASK) == DISTANCE_MASK {
                panic!("IndexMap probe sequence exceeded the maximum length during rehash");
            }

            wanted += DISTANCE_ONE;
        }
    }
}
