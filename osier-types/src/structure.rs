//! Type structure images.
//!
//! Primitive structures are hashed and compared bytewise by the interner, so
//! each has a fixed little-endian byte image with explicit padding.

use osier_pool::IdentifierId;
use osier_syntax::AstNodeId;

use crate::TypeId;

/// `Integer { bits, is_signed }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntegerType {
    /// Width in bits.
    pub bits: u16,
    /// Signedness.
    pub is_signed: bool,
}

impl IntegerType {
    /// Bytes of the structure image.
    pub const IMAGE_BYTES: usize = 4;

    /// Serializes into the interner image.
    pub fn to_bytes(self) -> [u8; Self::IMAGE_BYTES] {
        let [lo, hi] = self.bits.to_le_bytes();

        [lo, hi, u8::from(self.is_signed), 0]
    }

    /// Deserializes an interner image.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: u16::from_le_bytes([bytes[0], bytes[1]]),
            is_signed: bytes[2] != 0,
        }
    }
}

/// `Float { bits }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatType {
    /// Width in bits.
    pub bits: u16,
}

impl FloatType {
    /// Bytes of the structure image.
    pub const IMAGE_BYTES: usize = 4;

    /// Serializes into the interner image.
    pub fn to_bytes(self) -> [u8; Self::IMAGE_BYTES] {
        let [lo, hi] = self.bits.to_le_bytes();

        [lo, hi, 0, 0]
    }

    /// Deserializes an interner image.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bits: u16::from_le_bytes([bytes[0], bytes[1]]),
        }
    }
}

/// `Boolean { }` — carries no structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BooleanType;

impl BooleanType {
    /// Bytes of the structure image.
    pub const IMAGE_BYTES: usize = 0;

    /// Serializes into the interner image.
    pub fn to_bytes(self) -> [u8; Self::IMAGE_BYTES] {
        []
    }
}

/// `Ptr` / `Slice { referenced_type_id, is_mut, is_multi, is_opt }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceType {
    /// The type referred to.
    pub referenced_type_id: TypeId,
    /// Writable through this reference.
    pub is_mut: bool,
    /// Multi-element pointer.
    pub is_multi: bool,
    /// Optional reference.
    pub is_opt: bool,
}

impl ReferenceType {
    /// Bytes of the structure image.
    pub const IMAGE_BYTES: usize = 8;

    const MUT: u8 = 1;
    const MULTI: u8 = 2;
    const OPT: u8 = 4;

    /// Serializes into the interner image.
    pub fn to_bytes(self) -> [u8; Self::IMAGE_BYTES] {
        let id = self.referenced_type_id.to_raw().to_le_bytes();

        let mut flags = 0u8;

        if self.is_mut {
            flags |= Self::MUT;
        }

        if self.is_multi {
            flags |= Self::MULTI;
        }

        if self.is_opt {
            flags |= Self::OPT;
        }

        [id[0], id[1], id[2], id[3], flags, 0, 0, 0]
    }

    /// Deserializes an interner image.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        let flags = bytes[4];

        Self {
            referenced_type_id: TypeId::from_raw(raw),
            is_mut: flags & Self::MUT != 0,
            is_multi: flags & Self::MULTI != 0,
            is_opt: flags & Self::OPT != 0,
        }
    }
}

/// `Array { element_type_id, element_count }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayType {
    /// Element type.
    pub element_type_id: TypeId,
    /// Number of elements.
    pub element_count: u64,
}

impl ArrayType {
    /// Bytes of the structure image.
    pub const IMAGE_BYTES: usize = 12;

    /// Serializes into the interner image.
    pub fn to_bytes(self) -> [u8; Self::IMAGE_BYTES] {
        let mut out = [0u8; Self::IMAGE_BYTES];

        out[0..4].copy_from_slice(&self.element_type_id.to_raw().to_le_bytes());
        out[4..12].copy_from_slice(&self.element_count.to_le_bytes());

        out
    }

    /// Deserializes an interner image.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            element_type_id: TypeId::from_raw(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            element_count: u64::from_le_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7], bytes[8], bytes[9], bytes[10], bytes[11],
            ]),
        }
    }
}

/// One member of a composite type.
///
/// `opt_type` and `opt_value` reference the defining AST nodes; either may be
/// [`AstNodeId::INVALID`]. For globals, `offset_or_global_value` holds the
/// global slot; otherwise the byte offset within the composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Member {
    /// Member name.
    pub name: IdentifierId,
    /// Declared type expression, if any.
    pub opt_type: AstNodeId,
    /// Initializer expression, if any.
    pub opt_value: AstNodeId,
    /// `mut` marker.
    pub is_mut: bool,
    /// `pub` marker.
    pub is_pub: bool,
    /// File-scope global rather than an instance member.
    pub is_global: bool,
    /// Byte offset within the composite, or the global slot.
    pub offset_or_global_value: u64,
}

impl Member {
    /// Bytes of one serialized member.
    pub const IMAGE_BYTES: usize = 24;

    const MUT: u8 = 1;
    const PUB: u8 = 2;
    const GLOBAL: u8 = 4;

    /// Serializes into composite member storage.
    pub fn to_bytes(self) -> [u8; Self::IMAGE_BYTES] {
        let mut out = [0u8; Self::IMAGE_BYTES];

        out[0..4].copy_from_slice(&self.name.to_raw().to_le_bytes());
        out[4..8].copy_from_slice(&self.opt_type.to_raw().to_le_bytes());
        out[8..12].copy_from_slice(&self.opt_value.to_raw().to_le_bytes());

        let mut flags = 0u8;

        if self.is_mut {
            flags |= Self::MUT;
        }

        if self.is_pub {
            flags |= Self::PUB;
        }

        if self.is_global {
            flags |= Self::GLOBAL;
        }

        out[12] = flags;
        out[16..24].copy_from_slice(&self.offset_or_global_value.to_le_bytes());

        out
    }

    /// Deserializes from composite member storage.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let flags = bytes[12];

        Self {
            name: IdentifierId::from_raw(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            opt_type: AstNodeId::from_raw(u32::from_le_bytes([
                bytes[4], bytes[5], bytes[6], bytes[7],
            ])),
            opt_value: AstNodeId::from_raw(u32::from_le_bytes([
                bytes[8], bytes[9], bytes[10], bytes[11],
            ])),
            is_mut: flags & Self::MUT != 0,
            is_pub: flags & Self::PUB != 0,
            is_global: flags & Self::GLOBAL != 0,
            offset_or_global_value: u64::from_le_bytes([
                bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22],
                bytes[23],
            ]),
        }
    }
}

/// Layout header of a completed composite type.
///
/// `size`, `align` and `stride` are fixed at build completion and never
/// mutated afterwards. `is_complete` flips once the semantic pass has
/// resolved every member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeHeader {
    /// Size in bytes.
    pub size: u64,
    /// Alignment in bytes.
    pub align: u32,
    /// Array stride in bytes.
    pub stride: u64,
    /// Whether the semantic pass has completed this type.
    pub is_complete: bool,
    /// Number of members.
    pub member_count: u32,
}
