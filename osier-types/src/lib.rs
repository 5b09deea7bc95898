//! Type system of the osier front end.
//!
//! Primitive, reference and array types are *structural*: equal tag and
//! structure bytes intern to the same [`TypeId`]. Composite (struct-like)
//! types are *nominal*: every completed builder mints a fresh id, even for
//! structurally identical layouts.

#![warn(missing_docs)]
#![deny(unused_must_use)]

mod pool;
mod structure;

pub use pool::{MemberIterator, TypeBuilder, TypePool};
pub use structure::{
    ArrayType, BooleanType, CompositeHeader, FloatType, IntegerType, Member, ReferenceType,
};

use core::fmt;

/// Opaque 32-bit handle to a type in a [`TypePool`].
///
/// Raw values stay below 2^31 so an id plus its assignability bit fit a
/// single word ([`TypeIdWithAssignability`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TypeId(u32);

impl TypeId {
    /// Reserved sentinel for "no type".
    pub const INVALID: TypeId = TypeId(0x7fff_ffff);

    /// Raw id constructor.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 31-bit value.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Whether this id is the reserved sentinel.
    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_invalid() {
            write!(f, "TypeId<INVALID>")
        } else {
            write!(f, "TypeId<{}>", self.0)
        }
    }
}

/// A [`TypeId`] carrying an "assignable" bit in its top bit, used for
/// mutability tracking on bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TypeIdWithAssignability(u32);

impl TypeIdWithAssignability {
    /// Reserved sentinel (invalid id, not assignable).
    pub const INVALID: TypeIdWithAssignability =
        TypeIdWithAssignability(TypeId::INVALID.0);

    const ASSIGNABLE_BIT: u32 = 1 << 31;

    /// Combines an id and its assignability.
    pub const fn new(id: TypeId, is_assignable: bool) -> Self {
        if is_assignable {
            Self(id.0 | Self::ASSIGNABLE_BIT)
        } else {
            Self(id.0)
        }
    }

    /// The id without the assignability bit.
    pub const fn id(self) -> TypeId {
        TypeId(self.0 & !Self::ASSIGNABLE_BIT)
    }

    /// Whether the binding this annotation sits on may be assigned to.
    pub const fn is_assignable(self) -> bool {
        self.0 & Self::ASSIGNABLE_BIT != 0
    }

    /// The raw combined word.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Rebuilds from a raw combined word.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }
}

/// Discriminates what a [`TypeId`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
pub enum TypeTag {
    /// The type of types.
    Type = 1,
    /// An unresolved definition.
    Definition,
    /// Compile-time integer.
    CompInteger,
    /// Compile-time float.
    CompFloat,
    /// Compile-time string.
    CompString,
    /// Sized integer.
    Integer,
    /// Sized float.
    Float,
    /// Boolean.
    Boolean,
    /// Compiler builtin.
    Builtin,
    /// Untyped composite literal.
    CompositeLiteral,
    /// Untyped array literal.
    ArrayLiteral,
    /// A composite type still being built.
    TypeBuilder,
    /// Slice reference.
    Slice,
    /// Pointer reference.
    Ptr,
    /// Fixed-length array.
    Array,
    /// Function type.
    Func,
    /// Completed composite.
    Composite,
}

impl TypeTag {
    /// Stable display name.
    pub const fn name(self) -> &'static str {
        match self {
            TypeTag::Type => "Type",
            TypeTag::Definition => "Definition",
            TypeTag::CompInteger => "CompInteger",
            TypeTag::CompFloat => "CompFloat",
            TypeTag::CompString => "CompString",
            TypeTag::Integer => "Integer",
            TypeTag::Float => "Float",
            TypeTag::Boolean => "Boolean",
            TypeTag::Builtin => "Builtin",
            TypeTag::CompositeLiteral => "CompositeLiteral",
            TypeTag::ArrayLiteral => "ArrayLiteral",
            TypeTag::TypeBuilder => "TypeBuilder",
            TypeTag::Slice => "Slice",
            TypeTag::Ptr => "Ptr",
            TypeTag::Array => "Array",
            TypeTag::Func => "Func",
            TypeTag::Composite => "Composite",
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
