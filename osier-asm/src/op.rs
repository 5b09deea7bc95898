//! Opcode catalog and its wire encoding.

use core::fmt;

use bitflags::bitflags;
use osier_pool::IdentifierId;

use crate::{CompFloatValue, CompIntegerValue, ForeverValueId, GlobalFileIndex, OpcodeId};

/// Mask of the tag bits within an instruction's first byte.
pub const TAG_MASK: u8 = 0x7f;

/// High bit of the first byte: the instruction consumes the write context.
pub const CONSUMES_WRITE_CTX_BIT: u8 = 0x80;

/// Raw opcode tags, the low 7 bits of an instruction's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
#[allow(missing_docs)] // the variant set mirrors `Op`, which carries the docs
pub enum OpTag {
    SetWriteCtx = 1,
    ScopeEnd,
    PopClosure,
    ExecArgs,
    Call,
    Return,
    AddressOf,
    Dereference,
    Index,
    BitNot,
    LogicalAnd,
    LogicalOr,
    LogicalNot,
    Negate,
    UnaryPlus,
    ArrayType,
    Undefined,
    Unreachable,
    ValueVoid,
    DiscardVoid,
    CheckTopVoid,
    CheckWriteCtxVoid,
    ScopeBegin,
    ScopeAllocTyped,
    ScopeAllocUntyped,
    FileGlobalAllocTyped,
    FileGlobalAllocUntyped,
    LoadScope,
    LoadGlobal,
    LoadMember,
    LoadClosure,
    LoadBuiltin,
    ExecBuiltin,
    Signature,
    DynSignature,
    BindBody,
    BindBodyWithClosure,
    PrepareArgs,
    CompleteParamTypedNoDefault,
    CompleteParamTypedWithDefault,
    CompleteParamUntyped,
    ArrayPreInit,
    ArrayPostInit,
    CompositePreInit,
    CompositePostInit,
    If,
    IfElse,
    Loop,
    LoopFinally,
    Slice,
    BinaryArithmeticOp,
    Shift,
    BinaryBitwiseOp,
    Compare,
    ReferenceType,
    ValueInteger,
    ValueFloat,
    ValueString,
    Switch,
    EndCode,
}

impl OpTag {
    /// Decodes a tag byte (after masking off the write-context bit).
    pub fn from_u8(raw: u8) -> Option<OpTag> {
        use strum::IntoEnumIterator;

        OpTag::iter().find(|t| *t as u8 == raw)
    }

    /// Stable display name.
    pub const fn name(self) -> &'static str {
        match self {
            OpTag::SetWriteCtx => "SetWriteCtx",
            OpTag::ScopeEnd => "ScopeEnd",
            OpTag::PopClosure => "PopClosure",
            OpTag::ExecArgs => "ExecArgs",
            OpTag::Call => "Call",
            OpTag::Return => "Return",
            OpTag::AddressOf => "AddressOf",
            OpTag::Dereference => "Dereference",
            OpTag::Index => "Index",
            OpTag::BitNot => "BitNot",
            OpTag::LogicalAnd => "LogicalAnd",
            OpTag::LogicalOr => "LogicalOr",
            OpTag::LogicalNot => "LogicalNot",
            OpTag::Negate => "Negate",
            OpTag::UnaryPlus => "UnaryPlus",
            OpTag::ArrayType => "ArrayType",
            OpTag::Undefined => "Undefined",
            OpTag::Unreachable => "Unreachable",
            OpTag::ValueVoid => "ValueVoid",
            OpTag::DiscardVoid => "DiscardVoid",
            OpTag::CheckTopVoid => "CheckTopVoid",
            OpTag::CheckWriteCtxVoid => "CheckWriteCtxVoid",
            OpTag::ScopeBegin => "ScopeBegin",
            OpTag::ScopeAllocTyped => "ScopeAllocTyped",
            OpTag::ScopeAllocUntyped => "ScopeAllocUntyped",
            OpTag::FileGlobalAllocTyped => "FileGlobalAllocTyped",
            OpTag::FileGlobalAllocUntyped => "FileGlobalAllocUntyped",
            OpTag::LoadScope => "LoadScope",
            OpTag::LoadGlobal => "LoadGlobal",
            OpTag::LoadMember => "LoadMember",
            OpTag::LoadClosure => "LoadClosure",
            OpTag::LoadBuiltin => "LoadBuiltin",
            OpTag::ExecBuiltin => "ExecBuiltin",
            OpTag::Signature => "Signature",
            OpTag::DynSignature => "DynSignature",
            OpTag::BindBody => "BindBody",
            OpTag::BindBodyWithClosure => "BindBodyWithClosure",
            OpTag::PrepareArgs => "PrepareArgs",
            OpTag::CompleteParamTypedNoDefault => "CompleteParamTypedNoDefault",
            OpTag::CompleteParamTypedWithDefault => "CompleteParamTypedWithDefault",
            OpTag::CompleteParamUntyped => "CompleteParamUntyped",
            OpTag::ArrayPreInit => "ArrayPreInit",
            OpTag::ArrayPostInit => "ArrayPostInit",
            OpTag::CompositePreInit => "CompositePreInit",
            OpTag::CompositePostInit => "CompositePostInit",
            OpTag::If => "If",
            OpTag::IfElse => "IfElse",
            OpTag::Loop => "Loop",
            OpTag::LoopFinally => "LoopFinally",
            OpTag::Slice => "Slice",
            OpTag::BinaryArithmeticOp => "BinaryArithmeticOp",
            OpTag::Shift => "Shift",
            OpTag::BinaryBitwiseOp => "BinaryBitwiseOp",
            OpTag::Compare => "Compare",
            OpTag::ReferenceType => "ReferenceType",
            OpTag::ValueInteger => "ValueInteger",
            OpTag::ValueFloat => "ValueFloat",
            OpTag::ValueString => "ValueString",
            OpTag::Switch => "Switch",
            OpTag::EndCode => "EndCode",
        }
    }
}

impl fmt::Display for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compiler builtin referenced by `LoadBuiltin` / `ExecBuiltin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Builtin {
    Void = 1,
    Bool,
    Integer,
    Float,
    Type,
    Typeof,
    Sizeof,
    Alignof,
    Strideof,
    Import,
}

impl Builtin {
    fn from_u8(raw: u8) -> Option<Builtin> {
        use strum::IntoEnumIterator;

        Builtin::iter().find(|b| *b as u8 == raw)
    }

    /// Stable display name.
    pub const fn name(self) -> &'static str {
        match self {
            Builtin::Void => "Void",
            Builtin::Bool => "Bool",
            Builtin::Integer => "Integer",
            Builtin::Float => "Float",
            Builtin::Type => "Type",
            Builtin::Typeof => "Typeof",
            Builtin::Sizeof => "Sizeof",
            Builtin::Alignof => "Alignof",
            Builtin::Strideof => "Strideof",
            Builtin::Import => "Import",
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Flag byte of `Signature` / `DynSignature`.
    pub struct SignatureFlags: u8 {
        /// `func` rather than `proc`.
        const IS_FUNC = 1;
        /// The return type is templated and carries a completion stream.
        const HAS_TEMPLATED_RETURN_TYPE = 2;
    }
}

bitflags! {
    /// Per-parameter flag byte of `Signature` / `DynSignature`.
    pub struct SignatureParameterFlags: u8 {
        /// `mut` parameter.
        const IS_MUT = 1;
        /// Evaluated at compile time.
        const IS_EVAL = 2;
        /// Carries a type annotation.
        const HAS_TYPE = 4;
        /// Carries a default value.
        const HAS_DEFAULT = 8;
        /// Templated; carries a completion stream.
        const IS_TEMPLATED = 16;
    }
}

bitflags! {
    /// Operand byte of `ReferenceType`.
    pub struct ReferenceTypeFlags: u8 {
        /// Slice rather than pointer.
        const IS_SLICE = 1;
        /// Writable through the reference.
        const IS_MUT = 2;
        /// Multi-element pointer.
        const IS_MULTI = 4;
        /// Optional reference.
        const IS_OPT = 8;
    }
}

macro_rules! kind_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr => $display:expr,)+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter)]
        #[repr(u8)]
        #[allow(missing_docs)]
        pub enum $name {
            $($variant = $value,)+
        }

        impl $name {
            fn from_u8(raw: u8) -> Option<$name> {
                use strum::IntoEnumIterator;

                $name::iter().find(|k| *k as u8 == raw)
            }

            /// Stable display name.
            pub const fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $display,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

kind_enum! {
    /// Bound shape of a `Slice` instruction.
    SliceKind {
        NoBounds = 0 => "no_bounds",
        BeginBound = 1 => "begin_bound",
        EndBound = 2 => "end_bound",
        BothBounds = 3 => "both_bounds",
    }
}

kind_enum! {
    /// Kind of a `BinaryArithmeticOp` instruction; the `*Trap` variants trap
    /// on overflow.
    ArithmeticKind {
        Add = 0 => "add",
        Sub = 1 => "sub",
        Mul = 2 => "mul",
        Div = 3 => "div",
        AddTrap = 4 => "add_trap",
        SubTrap = 5 => "sub_trap",
        MulTrap = 6 => "mul_trap",
        Mod = 7 => "mod",
    }
}

kind_enum! {
    /// Kind of a `Shift` instruction.
    ShiftKind {
        Left = 0 => "left",
        Right = 1 => "right",
    }
}

kind_enum! {
    /// Kind of a `BinaryBitwiseOp` instruction.
    BitwiseKind {
        And = 0 => "and",
        Or = 1 => "or",
        Xor = 2 => "xor",
    }
}

kind_enum! {
    /// Kind of a `Compare` instruction.
    CompareKind {
        Lt = 0 => "less_than",
        Gt = 1 => "greater_than",
        Le = 2 => "less_or_equal",
        Ge = 3 => "greater_or_equal",
        Ne = 4 => "not_equal",
        Eq = 5 => "equal",
    }
}

/// One `Signature` parameter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignatureParameter {
    /// Parameter name.
    pub name: IdentifierId,
    /// Parameter flags.
    pub flags: SignatureParameterFlags,
}

/// One `DynSignature` parameter record. `completion` is present exactly when
/// `flags` contains [`SignatureParameterFlags::IS_TEMPLATED`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DynSignatureParameter {
    /// Parameter name.
    pub name: IdentifierId,
    /// Parameter flags.
    pub flags: SignatureParameterFlags,
    /// Completion stream for templated parameters.
    pub completion: Option<OpcodeId>,
}

/// One decoded instruction and its write-context flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Instr {
    /// The operation.
    pub op: Op,
    /// Whether the instruction consumes the current write context (printed
    /// as `@`).
    pub consumes_write_ctx: bool,
}

/// The opcode catalog.
///
/// Every variant's operands encode in the fixed order given here; see the
/// per-variant comments for the wire layout after the tag byte.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Makes the top of stack the write context.
    SetWriteCtx,
    /// Ends the innermost scope.
    ScopeEnd,
    /// Pops the active closure.
    PopClosure,
    /// Evaluates prepared arguments.
    ExecArgs,
    /// Calls the prepared callee.
    Call,
    /// Returns from the active body.
    Return,
    /// `&expr`.
    AddressOf,
    /// `$expr`.
    Dereference,
    /// `expr[index]`.
    Index,
    /// `~expr`.
    BitNot,
    /// `a && b`.
    LogicalAnd,
    /// `a || b`.
    LogicalOr,
    /// `!expr`.
    LogicalNot,
    /// Unary `-expr`.
    Negate,
    /// Unary `+expr`.
    UnaryPlus,
    /// Array type constructor.
    ArrayType,
    /// The `undefined` value.
    Undefined,
    /// Trap.
    Unreachable,
    /// Pushes the void value.
    ValueVoid,
    /// Discards a void result.
    DiscardVoid,
    /// Asserts the top of stack is void.
    CheckTopVoid,
    /// Asserts the write context is void.
    CheckWriteCtxVoid,
    /// `u16 member_count`.
    ScopeBegin {
        /// Bindings the scope will hold.
        member_count: u16,
    },
    /// `bool is_mut`.
    ScopeAllocTyped {
        /// Binding mutability.
        is_mut: bool,
    },
    /// `bool is_mut`.
    ScopeAllocUntyped {
        /// Binding mutability.
        is_mut: bool,
    },
    /// `bool is_mut, GlobalFileIndex, u16 rank`.
    FileGlobalAllocTyped {
        /// Binding mutability.
        is_mut: bool,
        /// Owning file.
        file_index: GlobalFileIndex,
        /// Slot within the file.
        rank: u16,
    },
    /// `bool is_mut, GlobalFileIndex, u16 rank`.
    FileGlobalAllocUntyped {
        /// Binding mutability.
        is_mut: bool,
        /// Owning file.
        file_index: GlobalFileIndex,
        /// Slot within the file.
        rank: u16,
    },
    /// `u16 out, u16 rank`.
    LoadScope {
        /// Scopes outward from the innermost.
        out: u16,
        /// Slot within that scope.
        rank: u16,
    },
    /// `GlobalFileIndex, u16 rank`.
    LoadGlobal {
        /// Owning file.
        file_index: GlobalFileIndex,
        /// Slot within the file.
        rank: u16,
    },
    /// `IdentifierId`.
    LoadMember {
        /// Member name.
        name: IdentifierId,
    },
    /// `u16 rank`.
    LoadClosure {
        /// Slot within the closure.
        rank: u16,
    },
    /// `Builtin`.
    LoadBuiltin {
        /// The builtin.
        builtin: Builtin,
    },
    /// `Builtin`.
    ExecBuiltin {
        /// The builtin.
        builtin: Builtin,
    },
    /// `flags, u8 parameter_count, u8 value_count, parameter_count ×
    /// (IdentifierId, flags)`.
    Signature {
        /// Signature flags.
        flags: SignatureFlags,
        /// Values the body leaves on the stack.
        value_count: u8,
        /// Parameters in declaration order.
        parameters: Vec<SignatureParameter>,
    },
    /// `flags, u8 parameter_count, u8 value_count, u16 closed_count,
    /// [return completion OpcodeId], per-parameter records with optional
    /// completion OpcodeIds`.
    DynSignature {
        /// Signature flags.
        flags: SignatureFlags,
        /// Values the body leaves on the stack.
        value_count: u8,
        /// Closed-over value count.
        closed_count: u16,
        /// Completion stream of a templated return type; present exactly
        /// when the flags say so.
        return_completion: Option<OpcodeId>,
        /// Parameters in declaration order.
        parameters: Vec<DynSignatureParameter>,
    },
    /// `OpcodeId body`.
    BindBody {
        /// The body stream.
        body: OpcodeId,
    },
    /// `OpcodeId body, u16 closed_count`.
    BindBodyWithClosure {
        /// The body stream.
        body: OpcodeId,
        /// Closed-over value count.
        closed_count: u16,
    },
    /// `u8 argument_count, IdentifierId[count], OpcodeId[count]`.
    PrepareArgs {
        /// `(name, callback)` per argument; unnamed positional arguments use
        /// [`IdentifierId::INVALID`].
        arguments: Vec<(IdentifierId, OpcodeId)>,
    },
    /// `u8 rank`.
    CompleteParamTypedNoDefault {
        /// Parameter rank.
        rank: u8,
    },
    /// `u8 rank`.
    CompleteParamTypedWithDefault {
        /// Parameter rank.
        rank: u8,
    },
    /// `u8 rank`.
    CompleteParamUntyped {
        /// Parameter rank.
        rank: u8,
    },
    /// `u16 index_count, u16 leading_elem_count, u16[index_count]`.
    ArrayPreInit {
        /// Elements before the first indexed initializer.
        leading_elem_count: u16,
        /// Elements following each indexed initializer.
        following_elem_counts: Vec<u16>,
    },
    /// `u16 total_elem_count, u16 index_count, u16 leading_elem_count,
    /// u16[index_count]`.
    ArrayPostInit {
        /// Total element count.
        total_elem_count: u16,
        /// Elements before the first indexed initializer.
        leading_elem_count: u16,
        /// Elements following each indexed initializer.
        following_elem_counts: Vec<u16>,
    },
    /// `u16 names_count, u16 leading_initializer_count,
    /// (IdentifierId, u16)[names_count]`.
    CompositePreInit {
        /// Positional initializers before the first named one.
        leading_initializer_count: u16,
        /// `(name, following initializer count)` per named initializer.
        names: Vec<(IdentifierId, u16)>,
    },
    /// `u16 member_count, IdentifierId[member_count]`.
    CompositePostInit {
        /// Initialized member names in order.
        members: Vec<IdentifierId>,
    },
    /// `OpcodeId consequent`.
    If {
        /// Taken branch stream.
        consequent: OpcodeId,
    },
    /// `OpcodeId consequent, OpcodeId alternative`.
    IfElse {
        /// Taken branch stream.
        consequent: OpcodeId,
        /// Fallback branch stream.
        alternative: OpcodeId,
    },
    /// `OpcodeId condition, OpcodeId body`.
    Loop {
        /// Condition stream.
        condition: OpcodeId,
        /// Body stream.
        body: OpcodeId,
    },
    /// `OpcodeId condition, OpcodeId body, OpcodeId finally`.
    LoopFinally {
        /// Condition stream.
        condition: OpcodeId,
        /// Body stream.
        body: OpcodeId,
        /// Stream run after normal loop exit.
        finally: OpcodeId,
    },
    /// `SliceKind`.
    Slice {
        /// Bound shape.
        kind: SliceKind,
    },
    /// `ArithmeticKind`.
    BinaryArithmeticOp {
        /// Operation.
        kind: ArithmeticKind,
    },
    /// `ShiftKind`.
    Shift {
        /// Direction.
        kind: ShiftKind,
    },
    /// `BitwiseKind`.
    BinaryBitwiseOp {
        /// Operation.
        kind: BitwiseKind,
    },
    /// `CompareKind`.
    Compare {
        /// Relation.
        kind: CompareKind,
    },
    /// `ReferenceTypeFlags`.
    ReferenceType {
        /// Pointer/slice shape.
        flags: ReferenceTypeFlags,
    },
    /// Inline operand byte for values below 128, otherwise a marker byte
    /// followed by the value as a little-endian u64.
    ValueInteger {
        /// The value.
        value: CompIntegerValue,
    },
    /// `f64` bits, little endian.
    ValueFloat {
        /// The value.
        value: CompFloatValue,
    },
    /// `ForeverValueId`.
    ValueString {
        /// Interned value id.
        value: ForeverValueId,
    },
    /// Listed in the catalog, but its encoding is still unspecified; refusing
    /// to guess, the emitter panics and the reader reports it.
    Switch,
    /// Terminates a stream; exactly one per stream.
    EndCode,
}

impl Op {
    /// The raw tag of this operation.
    pub const fn tag(&self) -> OpTag {
        match self {
            Op::SetWriteCtx => OpTag::SetWriteCtx,
            Op::ScopeEnd => OpTag::ScopeEnd,
            Op::PopClosure => OpTag::PopClosure,
            Op::ExecArgs => OpTag::ExecArgs,
            Op::Call => OpTag::Call,
            Op::Return => OpTag::Return,
            Op::AddressOf => OpTag::AddressOf,
            Op::Dereference => OpTag::Dereference,
            Op::Index => OpTag::Index,
            Op::BitNot => OpTag::BitNot,
            Op::LogicalAnd => OpTag::LogicalAnd,
            Op::LogicalOr => OpTag::LogicalOr,
            Op::LogicalNot => OpTag::LogicalNot,
            Op::Negate => OpTag::Negate,
            Op::UnaryPlus => OpTag::UnaryPlus,
            Op::ArrayType => OpTag::ArrayType,
            Op::Undefined => OpTag::Undefined,
            Op::Unreachable => OpTag::Unreachable,
            Op::ValueVoid => OpTag::ValueVoid,
            Op::DiscardVoid => OpTag::DiscardVoid,
            Op::CheckTopVoid => OpTag::CheckTopVoid,
            Op::CheckWriteCtxVoid => OpTag::CheckWriteCtxVoid,
            Op::ScopeBegin { .. } => OpTag::ScopeBegin,
            Op::ScopeAllocTyped { .. } => OpTag::ScopeAllocTyped,
            Op::ScopeAllocUntyped { .. } => OpTag::ScopeAllocUntyped,
            Op::FileGlobalAllocTyped { .. } => OpTag::FileGlobalAllocTyped,
            Op::FileGlobalAllocUntyped { .. } => OpTag::FileGlobalAllocUntyped,
            Op::LoadScope { .. } => OpTag::LoadScope,
            Op::LoadGlobal { .. } => OpTag::LoadGlobal,
            Op::LoadMember { .. } => OpTag::LoadMember,
            Op::LoadClosure { .. } => OpTag::LoadClosure,
            Op::LoadBuiltin { .. } => OpTag::LoadBuiltin,
            Op::ExecBuiltin { .. } => OpTag::ExecBuiltin,
            Op::Signature { .. } => OpTag::Signature,
            Op::DynSignature { .. } => OpTag::DynSignature,
            Op::BindBody { .. } => OpTag::BindBody,
            Op::BindBodyWithClosure { .. } => OpTag::BindBodyWithClosure,
            Op::PrepareArgs { .. } => OpTag::PrepareArgs,
            Op::CompleteParamTypedNoDefault { .. } => OpTag::CompleteParamTypedNoDefault,
            Op::CompleteParamTypedWithDefault { .. } => OpTag::CompleteParamTypedWithDefault,
            Op::CompleteParamUntyped { .. } => OpTag::CompleteParamUntyped,
            Op::ArrayPreInit { .. } => OpTag::ArrayPreInit,
            Op::ArrayPostInit { .. } => OpTag::ArrayPostInit,
            Op::CompositePreInit { .. } => OpTag::CompositePreInit,
            Op::CompositePostInit { .. } => OpTag::CompositePostInit,
            Op::If { .. } => OpTag::If,
            Op::IfElse { .. } => OpTag::IfElse,
            Op::Loop { .. } => OpTag::Loop,
            Op::LoopFinally { .. } => OpTag::LoopFinally,
            Op::Slice { .. } => OpTag::Slice,
            Op::BinaryArithmeticOp { .. } => OpTag::BinaryArithmeticOp,
            Op::Shift { .. } => OpTag::Shift,
            Op::BinaryBitwiseOp { .. } => OpTag::BinaryBitwiseOp,
            Op::Compare { .. } => OpTag::Compare,
            Op::ReferenceType { .. } => OpTag::ReferenceType,
            Op::ValueInteger { .. } => OpTag::ValueInteger,
            Op::ValueFloat { .. } => OpTag::ValueFloat,
            Op::ValueString { .. } => OpTag::ValueString,
            Op::Switch => OpTag::Switch,
            Op::EndCode => OpTag::EndCode,
        }
    }

    /// Encodes the instruction, appending to `out`.
    ///
    /// Panics on `Op::Switch` (its encoding is unspecified) and on operand
    /// list lengths exceeding their count fields.
    pub(crate) fn encode_into(&self, consumes_write_ctx: bool, out: &mut Vec<u8>) {
        assert!(
            !matches!(self, Op::Switch),
            "the Switch opcode has no specified encoding"
        );

        let mut first = self.tag() as u8;

        if consumes_write_ctx {
            first |= CONSUMES_WRITE_CTX_BIT;
        }

        out.push(first);

        match self {
            Op::SetWriteCtx
            | Op::ScopeEnd
            | Op::PopClosure
            | Op::ExecArgs
            | Op::Call
            | Op::Return
            | Op::AddressOf
            | Op::Dereference
            | Op::Index
            | Op::BitNot
            | Op::LogicalAnd
            | Op::LogicalOr
            | Op::LogicalNot
            | Op::Negate
            | Op::UnaryPlus
            | Op::ArrayType
            | Op::Undefined
            | Op::Unreachable
            | Op::ValueVoid
            | Op::DiscardVoid
            | Op::CheckTopVoid
            | Op::CheckWriteCtxVoid
            | Op::EndCode => {}
            Op::ScopeBegin { member_count } => out.extend_from_slice(&member_count.to_le_bytes()),
            Op::ScopeAllocTyped { is_mut } | Op::ScopeAllocUntyped { is_mut } => {
                out.push(u8::from(*is_mut))
            }
            Op::FileGlobalAllocTyped {
                is_mut,
                file_index,
                rank,
            }
            | Op::FileGlobalAllocUntyped {
                is_mut,
                file_index,
                rank,
            } => {
                out.push(u8::from(*is_mut));
                out.extend_from_slice(&file_index.to_raw().to_le_bytes());
                out.extend_from_slice(&rank.to_le_bytes());
            }
            Op::LoadScope { out: scope_out, rank } => {
                out.extend_from_slice(&scope_out.to_le_bytes());
                out.extend_from_slice(&rank.to_le_bytes());
            }
            Op::LoadGlobal { file_index, rank } => {
                out.extend_from_slice(&file_index.to_raw().to_le_bytes());
                out.extend_from_slice(&rank.to_le_bytes());
            }
            Op::LoadMember { name } => out.extend_from_slice(&name.to_raw().to_le_bytes()),
            Op::LoadClosure { rank } => out.extend_from_slice(&rank.to_le_bytes()),
            Op::LoadBuiltin { builtin } | Op::ExecBuiltin { builtin } => {
                out.push(*builtin as u8)
            }
            Op::Signature {
                flags,
                value_count,
                parameters,
            } => {
                let parameter_count =
                    u8::try_from(parameters.len()).expect("signature parameter count fits u8");

                out.push(flags.bits());
                out.push(parameter_count);
                out.push(*value_count);

                for parameter in parameters {
                    out.extend_from_slice(&parameter.name.to_raw().to_le_bytes());
                    out.push(parameter.flags.bits());
                }
            }
            Op::DynSignature {
                flags,
                value_count,
                closed_count,
                return_completion,
                parameters,
            } => {
                let parameter_count =
                    u8::try_from(parameters.len()).expect("signature parameter count fits u8");

                assert_eq!(
                    flags.contains(SignatureFlags::HAS_TEMPLATED_RETURN_TYPE),
                    return_completion.is_some(),
                    "return completion must match the templated-return flag"
                );

                out.push(flags.bits());
                out.push(parameter_count);
                out.push(*value_count);
                out.extend_from_slice(&closed_count.to_le_bytes());

                if let Some(completion) = return_completion {
                    out.extend_from_slice(&completion.to_raw().to_le_bytes());
                }

                for parameter in parameters {
                    assert_eq!(
                        parameter.flags.contains(SignatureParameterFlags::IS_TEMPLATED),
                        parameter.completion.is_some(),
                        "parameter completion must match the templated flag"
                    );

                    out.extend_from_slice(&parameter.name.to_raw().to_le_bytes());
                    out.push(parameter.flags.bits());

                    if let Some(completion) = parameter.completion {
                        out.extend_from_slice(&completion.to_raw().to_le_bytes());
                    }
                }
            }
            Op::BindBody { body } => out.extend_from_slice(&body.to_raw().to_le_bytes()),
            Op::BindBodyWithClosure { body, closed_count } => {
                out.extend_from_slice(&body.to_raw().to_le_bytes());
                out.extend_from_slice(&closed_count.to_le_bytes());
            }
            Op::PrepareArgs { arguments } => {
                let argument_count =
                    u8::try_from(arguments.len()).expect("argument count fits u8");

                out.push(argument_count);

                for (name, _) in arguments {
                    out.extend_from_slice(&name.to_raw().to_le_bytes());
                }

                for (_, callback) in arguments {
                    out.extend_from_slice(&callback.to_raw().to_le_bytes());
                }
            }
            Op::CompleteParamTypedNoDefault { rank }
            | Op::CompleteParamTypedWithDefault { rank }
            | Op::CompleteParamUntyped { rank } => out.push(*rank),
            Op::ArrayPreInit {
                leading_elem_count,
                following_elem_counts,
            } => {
                let index_count =
                    u16::try_from(following_elem_counts.len()).expect("index count fits u16");

                out.extend_from_slice(&index_count.to_le_bytes());
                out.extend_from_slice(&leading_elem_count.to_le_bytes());

                for count in following_elem_counts {
                    out.extend_from_slice(&count.to_le_bytes());
                }
            }
            Op::ArrayPostInit {
                total_elem_count,
                leading_elem_count,
                following_elem_counts,
            } => {
                let index_count =
                    u16::try_from(following_elem_counts.len()).expect("index count fits u16");

                out.extend_from_slice(&total_elem_count.to_le_bytes());
                out.extend_from_slice(&index_count.to_le_bytes());
                out.extend_from_slice(&leading_elem_count.to_le_bytes());

                for count in following_elem_counts {
                    out.extend_from_slice(&count.to_le_bytes());
                }
            }
            Op::CompositePreInit {
                leading_initializer_count,
                names,
            } => {
                let names_count = u16::try_from(names.len()).expect("names count fits u16");

                out.extend_from_slice(&names_count.to_le_bytes());
                out.extend_from_slice(&leading_initializer_count.to_le_bytes());

                for (name, following) in names {
                    out.extend_from_slice(&name.to_raw().to_le_bytes());
                    out.extend_from_slice(&following.to_le_bytes());
                }
            }
            Op::CompositePostInit { members } => {
                let member_count = u16::try_from(members.len()).expect("member count fits u16");

                out.extend_from_slice(&member_count.to_le_bytes());

                for name in members {
                    out.extend_from_slice(&name.to_raw().to_le_bytes());
                }
            }
            Op::If { consequent } => out.extend_from_slice(&consequent.to_raw().to_le_bytes()),
            Op::IfElse {
                consequent,
                alternative,
            } => {
                out.extend_from_slice(&consequent.to_raw().to_le_bytes());
                out.extend_from_slice(&alternative.to_raw().to_le_bytes());
            }
            Op::Loop { condition, body } => {
                out.extend_from_slice(&condition.to_raw().to_le_bytes());
                out.extend_from_slice(&body.to_raw().to_le_bytes());
            }
            Op::LoopFinally {
                condition,
                body,
                finally,
            } => {
                out.extend_from_slice(&condition.to_raw().to_le_bytes());
                out.extend_from_slice(&body.to_raw().to_le_bytes());
                out.extend_from_slice(&finally.to_raw().to_le_bytes());
            }
            Op::Slice { kind } => out.push(*kind as u8),
            Op::BinaryArithmeticOp { kind } => out.push(*kind as u8),
            Op::Shift { kind } => out.push(*kind as u8),
            Op::BinaryBitwiseOp { kind } => out.push(*kind as u8),
            Op::Compare { kind } => out.push(*kind as u8),
            Op::ReferenceType { flags } => out.push(flags.bits()),
            Op::ValueInteger { value } => {
                let raw = value.to_u64();

                if raw < 0x80 {
                    out.push(raw as u8);
                } else {
                    out.push(0x80);
                    out.extend_from_slice(&raw.to_le_bytes());
                }
            }
            Op::ValueFloat { value } => {
                out.extend_from_slice(&value.to_f64().to_bits().to_le_bytes())
            }
            Op::ValueString { value } => out.extend_from_slice(&value.to_raw().to_le_bytes()),
            Op::Switch => unreachable!("rejected above"),
        }
    }
}

/// Failure while decoding an opcode stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// The stream ended inside an instruction.
    #[error("opcode stream ended inside the instruction at byte {at}")]
    UnexpectedEnd {
        /// Byte offset of the instruction.
        at: u32,
    },
    /// The tag byte matches no catalog entry.
    #[error("unknown opcode byte {byte:#04x} at byte {at}")]
    UnknownOpcode {
        /// The offending byte (write-context bit stripped).
        byte: u8,
        /// Byte offset of the instruction.
        at: u32,
    },
    /// An operand byte has no valid interpretation.
    #[error("invalid {what} operand at byte {at}")]
    InvalidOperand {
        /// Which operand was malformed.
        what: &'static str,
        /// Byte offset of the instruction.
        at: u32,
    },
    /// A `Switch` instruction was encountered; its encoding is unspecified.
    #[error("the Switch opcode at byte {at} has no specified encoding")]
    UnimplementedSwitch {
        /// Byte offset of the instruction.
        at: u32,
    },
}

/// Cursor over raw instruction bytes with bounds-checked reads.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
    instr_at: u32,
}

impl<'a> Cursor<'a> {
    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or(DecodeError::UnexpectedEnd { at: self.instr_at })?;

        self.pos += 1;

        Ok(b)
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes([self.u8()?, self.u8()?]))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes([
            self.u8()?,
            self.u8()?,
            self.u8()?,
            self.u8()?,
        ]))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        let lo = self.u32()?;
        let hi = self.u32()?;

        Ok(u64::from(lo) | (u64::from(hi) << 32))
    }

    fn opcode_id(&mut self) -> Result<OpcodeId, DecodeError> {
        Ok(OpcodeId::from_raw(self.u32()?))
    }

    fn identifier(&mut self) -> Result<IdentifierId, DecodeError> {
        Ok(IdentifierId::from_raw(self.u32()?))
    }
}

/// Decodes the instruction starting at byte `at` of `bytes`.
///
/// Returns the instruction and the offset one past it; the cursor advances by
/// exactly the encoded length.
pub(crate) fn decode_at(bytes: &[u8], at: usize) -> Result<(Instr, usize), DecodeError> {
    let instr_at = at as u32;

    let mut cursor = Cursor {
        bytes,
        pos: at,
        instr_at,
    };

    let first = cursor.u8()?;
    let consumes_write_ctx = first & CONSUMES_WRITE_CTX_BIT != 0;
    let raw_tag = first & TAG_MASK;

    let tag = OpTag::from_u8(raw_tag).ok_or(DecodeError::UnknownOpcode {
        byte: raw_tag,
        at: instr_at,
    })?;

    let op = match tag {
        OpTag::SetWriteCtx => Op::SetWriteCtx,
        OpTag::ScopeEnd => Op::ScopeEnd,
        OpTag::PopClosure => Op::PopClosure,
        OpTag::ExecArgs => Op::ExecArgs,
        OpTag::Call => Op::Call,
        OpTag::Return => Op::Return,
        OpTag::AddressOf => Op::AddressOf,
        OpTag::Dereference => Op::Dereference,
        OpTag::Index => Op::Index,
        OpTag::BitNot => Op::BitNot,
        OpTag::LogicalAnd => Op::LogicalAnd,
        OpTag::LogicalOr => Op::LogicalOr,
        OpTag::LogicalNot => Op::LogicalNot,
        OpTag::Negate => Op::Negate,
        OpTag::UnaryPlus => Op::UnaryPlus,
        OpTag::ArrayType => Op::ArrayType,
        OpTag::Undefined => Op::Undefined,
        OpTag::Unreachable => Op::Unreachable,
        OpTag::ValueVoid => Op::ValueVoid,
        OpTag::DiscardVoid => Op::DiscardVoid,
        OpTag::CheckTopVoid => Op::CheckTopVoid,
        OpTag::CheckWriteCtxVoid => Op::CheckWriteCtxVoid,
        OpTag::EndCode => Op::EndCode,
        OpTag::ScopeBegin => Op::ScopeBegin {
            member_count: cursor.u16()?,
        },
        OpTag::ScopeAllocTyped => Op::ScopeAllocTyped {
            is_mut: cursor.u8()? != 0,
        },
        OpTag::ScopeAllocUntyped => Op::ScopeAllocUntyped {
            is_mut: cursor.u8()? != 0,
        },
        OpTag::FileGlobalAllocTyped => Op::FileGlobalAllocTyped {
            is_mut: cursor.u8()? != 0,
            file_index: GlobalFileIndex::from_raw(cursor.u16()?),
            rank: cursor.u16()?,
        },
        OpTag::FileGlobalAllocUntyped => Op::FileGlobalAllocUntyped {
            is_mut: cursor.u8()? != 0,
            file_index: GlobalFileIndex::from_raw(cursor.u16()?),
            rank: cursor.u16()?,
        },
        OpTag::LoadScope => Op::LoadScope {
            out: cursor.u16()?,
            rank: cursor.u16()?,
        },
        OpTag::LoadGlobal => Op::LoadGlobal {
            file_index: GlobalFileIndex::from_raw(cursor.u16()?),
            rank: cursor.u16()?,
        },
        OpTag::LoadMember => Op::LoadMember {
            name: cursor.identifier()?,
        },
        OpTag::LoadClosure => Op::LoadClosure {
            rank: cursor.u16()?,
        },
        OpTag::LoadBuiltin => Op::LoadBuiltin {
            builtin: Builtin::from_u8(cursor.u8()?).ok_or(DecodeError::InvalidOperand {
                what: "builtin",
                at: instr_at,
            })?,
        },
        OpTag::ExecBuiltin => Op::ExecBuiltin {
            builtin: Builtin::from_u8(cursor.u8()?).ok_or(DecodeError::InvalidOperand {
                what: "builtin",
                at: instr_at,
            })?,
        },
        OpTag::Signature => {
            let flags = SignatureFlags::from_bits_truncate(cursor.u8()?);
            let parameter_count = cursor.u8()?;
            let value_count = cursor.u8()?;

            let mut parameters = Vec::with_capacity(usize::from(parameter_count));

            for _ in 0..parameter_count {
                let name = cursor.identifier()?;
                let flags = SignatureParameterFlags::from_bits_truncate(cursor.u8()?);

                parameters.push(SignatureParameter { name, flags });
            }

            Op::Signature {
                flags,
                value_count,
                parameters,
            }
        }
        OpTag::DynSignature => {
            let flags = SignatureFlags::from_bits_truncate(cursor.u8()?);
            let parameter_count = cursor.u8()?;
            let value_count = cursor.u8()?;
            let closed_count = cursor.u16()?;

            let return_completion = if flags.contains(SignatureFlags::HAS_TEMPLATED_RETURN_TYPE) {
                Some(cursor.opcode_id()?)
            } else {
                None
            };

            let mut parameters = Vec::with_capacity(usize::from(parameter_count));

            for _ in 0..parameter_count {
                let name = cursor.identifier()?;
                let parameter_flags = SignatureParameterFlags::from_bits_truncate(cursor.u8()?);

                let completion = if parameter_flags.contains(SignatureParameterFlags::IS_TEMPLATED)
                {
                    Some(cursor.opcode_id()?)
                } else {
                    None
                };

                parameters.push(DynSignatureParameter {
                    name,
                    flags: parameter_flags,
                    completion,
                });
            }

            Op::DynSignature {
                flags,
                value_count,
                closed_count,
                return_completion,
                parameters,
            }
        }
        OpTag::BindBody => Op::BindBody {
            body: cursor.opcode_id()?,
        },
        OpTag::BindBodyWithClosure => Op::BindBodyWithClosure {
            body: cursor.opcode_id()?,
            closed_count: cursor.u16()?,
        },
        OpTag::PrepareArgs => {
            let argument_count = usize::from(cursor.u8()?);

            let mut names = Vec::with_capacity(argument_count);

            for _ in 0..argument_count {
                names.push(cursor.identifier()?);
            }

            let mut arguments = Vec::with_capacity(argument_count);

            for name in names {
                arguments.push((name, cursor.opcode_id()?));
            }

            Op::PrepareArgs { arguments }
        }
        OpTag::CompleteParamTypedNoDefault => Op::CompleteParamTypedNoDefault {
            rank: cursor.u8()?,
        },
        OpTag::CompleteParamTypedWithDefault => Op::CompleteParamTypedWithDefault {
            rank: cursor.u8()?,
        },
        OpTag::CompleteParamUntyped => Op::CompleteParamUntyped {
            rank: cursor.u8()?,
        },
        OpTag::ArrayPreInit => {
            let index_count = usize::from(cursor.u16()?);
            let leading_elem_count = cursor.u16()?;

            let mut following_elem_counts = Vec::with_capacity(index_count);

            for _ in 0..index_count {
                following_elem_counts.push(cursor.u16()?);
            }

            Op::ArrayPreInit {
                leading_elem_count,
                following_elem_counts,
            }
        }
        OpTag::ArrayPostInit => {
            let total_elem_count = cursor.u16()?;
            let index_count = usize::from(cursor.u16()?);
            let leading_elem_count = cursor.u16()?;

            let mut following_elem_counts = Vec::with_capacity(index_count);

            for _ in 0..index_count {
                following_elem_counts.push(cursor.u16()?);
            }

            Op::ArrayPostInit {
                total_elem_count,
                leading_elem_count,
                following_elem_counts,
            }
        }
        OpTag::CompositePreInit => {
            let names_count = usize::from(cursor.u16()?);
            let leading_initializer_count = cursor.u16()?;

            let mut names = Vec::with_capacity(names_count);

            for _ in 0..names_count {
                let name = cursor.identifier()?;
                let following = cursor.u16()?;

                names.push((name, following));
            }

            Op::CompositePreInit {
                leading_initializer_count,
                names,
            }
        }
        OpTag::CompositePostInit => {
            let member_count = usize::from(cursor.u16()?);

            let mut members = Vec::with_capacity(member_count);

            for _ in 0..member_count {
                members.push(cursor.identifier()?);
            }

            Op::CompositePostInit { members }
        }
        OpTag::If => Op::If {
            consequent: cursor.opcode_id()?,
        },
        OpTag::IfElse => Op::IfElse {
            consequent: cursor.opcode_id()?,
            alternative: cursor.opcode_id()?,
        },
        OpTag::Loop => Op::Loop {
            condition: cursor.opcode_id()?,
            body: cursor.opcode_id()?,
        },
        OpTag::LoopFinally => Op::LoopFinally {
            condition: cursor.opcode_id()?,
            body: cursor.opcode_id()?,
            finally: cursor.opcode_id()?,
        },
        OpTag::Slice => Op::Slice {
            kind: SliceKind::from_u8(cursor.u8()?).ok_or(DecodeError::InvalidOperand {
                what: "slice kind",
                at: instr_at,
            })?,
        },
        OpTag::BinaryArithmeticOp => Op::BinaryArithmeticOp {
            kind: ArithmeticKind::from_u8(cursor.u8()?).ok_or(DecodeError::InvalidOperand {
                what: "arithmetic kind",
                at: instr_at,
            })?,
        },
        OpTag::Shift => Op::Shift {
            kind: ShiftKind::from_u8(cursor.u8()?).ok_or(DecodeError::InvalidOperand {
                what: "shift kind",
                at: instr_at,
            })?,
        },
        OpTag::BinaryBitwiseOp => Op::BinaryBitwiseOp {
            kind: BitwiseKind::from_u8(cursor.u8()?).ok_or(DecodeError::InvalidOperand {
                what: "bitwise kind",
                at: instr_at,
            })?,
        },
        OpTag::Compare => Op::Compare {
            kind: CompareKind::from_u8(cursor.u8()?).ok_or(DecodeError::InvalidOperand {
                what: "compare kind",
                at: instr_at,
            })?,
        },
        OpTag::ReferenceType => Op::ReferenceType {
            flags: ReferenceTypeFlags::from_bits_truncate(cursor.u8()?),
        },
        OpTag::ValueInteger => {
            let first = cursor.u8()?;

            let value = if first < 0x80 {
                u64::from(first)
            } else {
                cursor.u64()?
            };

            Op::ValueInteger {
                value: CompIntegerValue::from_u64(value),
            }
        }
        OpTag::ValueFloat => Op::ValueFloat {
            value: CompFloatValue::from_f64(f64::from_bits(cursor.u64()?)),
        },
        OpTag::ValueString => Op::ValueString {
            value: ForeverValueId::from_raw(cursor.u32()?),
        },
        OpTag::Switch => return Err(DecodeError::UnimplementedSwitch { at: instr_at }),
    };

    Ok((
        Instr {
            op,
            consumes_write_ctx,
        },
        cursor.pos,
    ))
}
