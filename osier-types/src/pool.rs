//! The type pool: structural interner plus nominal composite builder.

use core::fmt;

use osier_pool::{fnv1a_with, AllocPool, Allocation, IdentifierId, IndexMap, PoolValue, FNV1A_SEED};

use crate::structure::{CompositeHeader, Member};
use crate::{TypeId, TypeIdWithAssignability, TypeTag};

/// Interner record: `[hash][type id][tag | len << 8][structure bytes...]`.
struct TypeRecord;

#[derive(Clone, Copy)]
struct TypeKey<'a> {
    tag: TypeTag,
    structure: &'a [u8],
    /// Id that will be assigned if this key misses.
    next_id: u32,
}

const RECORD_HEADER_STRIDES: u32 = 3;

impl PoolValue for TypeRecord {
    type Key<'a> = TypeKey<'a>;

    const STRIDE_BYTES: usize = 4;

    fn hash_key(key: TypeKey<'_>) -> u32 {
        let hash = fnv1a_with(FNV1A_SEED, &[key.tag as u8]);

        fnv1a_with(hash, key.structure)
    }

    fn required_strides(key: TypeKey<'_>) -> u32 {
        RECORD_HEADER_STRIDES + (key.structure.len() as u32).div_ceil(Self::STRIDE_BYTES as u32)
    }

    fn write_new(dst: &mut [u8], key: TypeKey<'_>, hash: u32) {
        dst[0..4].copy_from_slice(&hash.to_le_bytes());
        dst[4..8].copy_from_slice(&key.next_id.to_le_bytes());
        dst[8..12]
            .copy_from_slice(&(u32::from(key.tag as u8) | (key.structure.len() as u32) << 8).to_le_bytes());
        dst[12..12 + key.structure.len()].copy_from_slice(key.structure);
    }

    fn used_strides(record: &[u8]) -> u32 {
        let tag_len = u32::from_le_bytes(record[8..12].try_into().expect("record header"));

        RECORD_HEADER_STRIDES + (tag_len >> 8).div_ceil(Self::STRIDE_BYTES as u32)
    }

    fn stored_hash(record: &[u8]) -> u32 {
        u32::from_le_bytes(record[0..4].try_into().expect("record hash"))
    }

    fn matches(record: &[u8], key: TypeKey<'_>, hash: u32) -> bool {
        if Self::stored_hash(record) != hash {
            return false;
        }

        let tag_len = u32::from_le_bytes(record[8..12].try_into().expect("record header"));

        (tag_len & 0xff) as u8 == key.tag as u8
            && (tag_len >> 8) as usize == key.structure.len()
            && &record[12..12 + key.structure.len()] == key.structure
    }
}

fn record_type_id(record: &[u8]) -> u32 {
    u32::from_le_bytes(record[4..8].try_into().expect("record id"))
}

fn record_structure(record: &[u8]) -> &[u8] {
    let tag_len = u32::from_le_bytes(record[8..12].try_into().expect("record header"));

    &record[12..12 + (tag_len >> 8) as usize]
}

enum EntryKind {
    /// Interned structural type; the structure bytes live in the interner's
    /// value store at this stride offset.
    Primitive { record_offset: u32 },
    /// Builder created, not yet completed.
    Pending,
    /// Completed composite.
    Composite {
        size: u64,
        align: u32,
        stride: u64,
        is_complete: bool,
        member_count: u32,
        members: Allocation,
    },
}

struct Entry {
    tag: TypeTag,
    name: IdentifierId,
    kind: EntryKind,
}

/// Accumulates the members of one composite type.
///
/// The [`TypeId`] is allocated up front so self-referential members can name
/// the type before it is completed.
pub struct TypeBuilder {
    id: TypeId,
    members: Vec<Member>,
}

impl TypeBuilder {
    /// The id the completed type will carry.
    pub const fn type_id(&self) -> TypeId {
        self.id
    }

    /// Appends a member; iteration order is insertion order.
    pub fn add_member(&mut self, member: Member) {
        self.members.push(member);
    }
}

/// Interns structural types and stores composite types.
pub struct TypePool {
    interner: IndexMap<TypeRecord>,
    entries: Vec<Entry>,
    member_storage: AllocPool,
}

impl TypePool {
    /// Creates a pool with defaults sized for a single compilation unit.
    pub fn new() -> Self {
        Self::with_capacity(1 << 20, 1 << 10, 1 << 24, 1 << 14)
    }

    /// Creates a pool with explicit interner sizing; see [`IndexMap::new`].
    pub fn with_capacity(
        lookup_capacity: usize,
        lookup_commit: usize,
        value_reserve_bytes: usize,
        value_commit_bytes: usize,
    ) -> Self {
        Self {
            interner: IndexMap::new(
                lookup_capacity,
                lookup_commit,
                value_reserve_bytes,
                value_commit_bytes,
            ),
            entries: Vec::new(),
            member_storage: AllocPool::new(1 << 14),
        }
    }

    fn entry(&self, id: TypeId) -> &Entry {
        assert!(!id.is_invalid(), "attempted to resolve TypeId::INVALID");

        &self.entries[id.to_raw() as usize]
    }

    /// Interns a structural type, returning the existing id when an equal
    /// `(tag, structure)` pair was interned before.
    pub fn simple_type(&mut self, tag: TypeTag, structure: &[u8]) -> TypeId {
        let next_id = self.entries.len() as u32;

        let record_offset = self.interner.index_from(TypeKey {
            tag,
            structure,
            next_id,
        });

        let id = record_type_id(self.interner.value_from(record_offset));

        if id == next_id {
            self.entries.push(Entry {
                tag,
                name: IdentifierId::INVALID,
                kind: EntryKind::Primitive { record_offset },
            });
        }

        TypeId::from_raw(id)
    }

    /// Starts building a composite type; the returned builder already owns
    /// its final id.
    pub fn create_type_builder(&mut self) -> TypeBuilder {
        let id = TypeId::from_raw(self.entries.len() as u32);

        self.entries.push(Entry {
            tag: TypeTag::TypeBuilder,
            name: IdentifierId::INVALID,
            kind: EntryKind::Pending,
        });

        TypeBuilder {
            id,
            members: Vec::new(),
        }
    }

    /// Publishes a builder's members with the final layout numbers.
    ///
    /// Composites are nominal: the id is fresh even when another composite
    /// has identical members. `is_complete` starts out false; the semantic
    /// pass flips it via [`TypePool::set_composite_complete`].
    pub fn complete_type(
        &mut self,
        builder: TypeBuilder,
        size: u64,
        align: u32,
        stride: u64,
    ) -> TypeId {
        let member_count = builder.members.len() as u32;

        let members = self
            .member_storage
            .alloc(builder.members.len() * Member::IMAGE_BYTES, 8);

        let bytes = self.member_storage.bytes_mut(members);

        for (i, member) in builder.members.iter().enumerate() {
            bytes[i * Member::IMAGE_BYTES..(i + 1) * Member::IMAGE_BYTES]
                .copy_from_slice(&member.to_bytes());
        }

        let entry = &mut self.entries[builder.id.to_raw() as usize];

        entry.tag = TypeTag::Composite;
        entry.kind = EntryKind::Composite {
            size,
            align,
            stride,
            is_complete: false,
            member_count,
            members,
        };

        builder.id
    }

    /// Marks a composite as semantically complete.
    pub fn set_composite_complete(&mut self, id: TypeId) {
        assert!(!id.is_invalid(), "attempted to resolve TypeId::INVALID");

        match &mut self.entries[id.to_raw() as usize].kind {
            EntryKind::Composite { is_complete, .. } => *is_complete = true,
            _ => panic!("{id} is not a composite type"),
        }
    }

    /// Tag of the type behind `id`.
    pub fn type_tag_from_id(&self, id: TypeId) -> TypeTag {
        self.entry(id).tag
    }

    /// Structure bytes of an interned structural type.
    pub fn primitive_type_structure(&self, id: TypeId) -> &[u8] {
        match self.entry(id).kind {
            EntryKind::Primitive { record_offset } => {
                record_structure(self.interner.value_from(record_offset))
            }
            _ => panic!("{id} is not a primitive type"),
        }
    }

    /// Layout header of a completed composite.
    pub fn composite_header(&self, id: TypeId) -> CompositeHeader {
        match self.entry(id).kind {
            EntryKind::Composite {
                size,
                align,
                stride,
                is_complete,
                member_count,
                ..
            } => CompositeHeader {
                size,
                align,
                stride,
                is_complete,
                member_count,
            },
            _ => panic!("{id} is not a completed composite type"),
        }
    }

    /// Members of a completed composite, in insertion order.
    pub fn members_of(&self, id: TypeId) -> MemberIterator<'_> {
        match self.entry(id).kind {
            EntryKind::Composite { members, .. } => MemberIterator {
                bytes: self.member_storage.bytes(members),
            },
            _ => panic!("{id} is not a completed composite type"),
        }
    }

    /// Name bound to the type, or [`IdentifierId::INVALID`] for anonymous
    /// types.
    pub fn type_name_from_id(&self, id: TypeId) -> IdentifierId {
        self.entry(id).name
    }

    /// Binds a name to a type (first definition wins).
    pub fn set_type_name(&mut self, id: TypeId, name: IdentifierId) {
        assert!(!id.is_invalid(), "attempted to resolve TypeId::INVALID");

        let entry = &mut self.entries[id.to_raw() as usize];

        if entry.name.is_invalid() {
            entry.name = name;
        }
    }

    /// Whether the annotated binding may be assigned to.
    pub fn is_assignable(&self, id: TypeIdWithAssignability) -> bool {
        id.is_assignable()
    }

    /// Number of types minted so far.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool holds no types.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TypePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypePool")
            .field("types", &self.entries.len())
            .finish()
    }
}

/// Yields a composite's members in insertion order.
pub struct MemberIterator<'a> {
    bytes: &'a [u8],
}

impl Iterator for MemberIterator<'_> {
    type Item = Member;

    fn next(&mut self) -> Option<Member> {
        if self.bytes.len() < Member::IMAGE_BYTES {
            return None;
        }

        let (head, tail) = self.bytes.split_at(Member::IMAGE_BYTES);

        self.bytes = tail;

        Some(Member::from_bytes(head))
    }
}
