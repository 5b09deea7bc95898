//! AST-to-opcode lowering.
//!
//! Walks a completed AST and emits opcode streams. Sub-streams (branch and
//! loop bodies, call argument callbacks, deferred code) are flushed to the
//! pool before the stream that references them, so every [`OpcodeId`] is a
//! back-reference and each stream stays contiguous.

use osier_asm::{
    ArithmeticKind, BitwiseKind, CompFloatValue, CompIntegerValue, CompareKind, ForeverValueId,
    GlobalFileIndex, Op, OpcodeId, OpcodePool, ReferenceTypeFlags, ShiftKind, SignatureFlags,
    SignatureParameter, SignatureParameterFlags,
};
use osier_pool::{IdentifierId, IdentifierPool};
use osier_syntax::{
    AstDirectChildIterator, AstFlags, AstNodeId, AstPool, AstTag, BinaryOpKind, SourceId,
    UnaryOpKind,
};
use osier_types::{TypeId, TypeIdWithAssignability, TypePool, TypeTag};

/// Lowering failure; these correspond to the type-error taxonomy and are
/// reported through the error sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LowerError {
    /// `a.b` requires `b` to be a plain name.
    #[error("member access requires an identifier on its right-hand side")]
    InvalidMemberAccess {
        /// Offending node's source.
        node_source: SourceId,
    },
    /// Assignment to something that is not a place expression.
    #[error("assignment target must be a name, member, index or dereference")]
    InvalidAssignmentTarget {
        /// Offending node's source.
        node_source: SourceId,
    },
}

type LowerResult<T> = Result<T, LowerError>;

/// Pending instruction of the stream currently being built.
struct PendingOp {
    op: Op,
    consumes_write_ctx: bool,
}

/// Lowers one file's AST into opcode streams.
pub struct Lowerer<'a> {
    asts: &'a mut AstPool,
    identifiers: &'a mut IdentifierPool,
    types: &'a mut TypePool,
    opcodes: &'a mut OpcodePool,
    /// Innermost scope last; each holds binding names in rank order.
    scopes: Vec<Vec<IdentifierId>>,
    /// File-level binding names in rank order.
    globals: Vec<IdentifierId>,
    file_index: GlobalFileIndex,
    undefined_name: IdentifierId,
}

enum Binding {
    Scope { out: u16, rank: u16 },
    Global { rank: u16 },
}

impl<'a> Lowerer<'a> {
    /// Creates a lowerer over the given pools.
    pub fn new(
        asts: &'a mut AstPool,
        identifiers: &'a mut IdentifierPool,
        types: &'a mut TypePool,
        opcodes: &'a mut OpcodePool,
        file_index: GlobalFileIndex,
    ) -> Self {
        let undefined_name = identifiers.index_from(b"undefined");

        Self {
            asts,
            identifiers,
            types,
            opcodes,
            scopes: Vec::new(),
            globals: Vec::new(),
            file_index,
            undefined_name,
        }
    }

    /// Annotates `id` with the interned comptime type for `tag`.
    ///
    /// Interning is idempotent, so repeated annotation of the same tag keeps
    /// returning the same [`TypeId`].
    fn annotate_comptime(&mut self, id: AstNodeId, tag: TypeTag) {
        let type_id = self.types.simple_type(tag, &[]);

        self.annotate(id, type_id);
    }

    /// Lowers the tree rooted at `root` (a `File` node), returning the id of
    /// the file's entry stream.
    pub fn lower_file(&mut self, root: AstNodeId) -> LowerResult<OpcodeId> {
        let children = self.child_ids(root);

        // File-level definitions get global ranks in declaration order.
        for &child in &children {
            let node = self.asts.node(child);

            if node.tag() == AstTag::Definition {
                self.globals
                    .push(IdentifierId::from_raw(node.ident_payload()));
            }
        }

        let mut ops = Vec::new();

        for child in children {
            self.lower_expr(child, &mut ops, false)?;
        }

        Ok(self.flush(ops))
    }

    // --- stream plumbing ----------------------------------------------------

    /// Writes `ops` plus a terminating `EndCode` to the pool as one
    /// contiguous stream; returns the id of its first instruction.
    fn flush(&mut self, ops: Vec<PendingOp>) -> OpcodeId {
        let mut first = None;

        for pending in &ops {
            let id = if pending.consumes_write_ctx {
                self.opcodes.emit_consuming_write_ctx(&pending.op)
            } else {
                self.opcodes.emit(&pending.op)
            };

            first.get_or_insert(id);
        }

        let end = self.opcodes.emit(&Op::EndCode);

        first.unwrap_or(end)
    }

    /// Builds a sub-stream with `build` and flushes it immediately, before
    /// the caller appends the instruction that references it.
    fn emit_stream(
        &mut self,
        build: impl FnOnce(&mut Self, &mut Vec<PendingOp>) -> LowerResult<()>,
    ) -> LowerResult<OpcodeId> {
        let mut ops = Vec::new();

        build(self, &mut ops)?;

        Ok(self.flush(ops))
    }

    fn push(ops: &mut Vec<PendingOp>, op: Op, consumes_write_ctx: bool) {
        ops.push(PendingOp {
            op,
            consumes_write_ctx,
        });
    }

    // --- AST access ---------------------------------------------------------

    fn child_ids(&self, id: AstNodeId) -> Vec<AstNodeId> {
        AstDirectChildIterator::new(self.asts.node(id))
            .map(|n| n.id())
            .collect()
    }

    fn annotate(&mut self, id: AstNodeId, type_id: TypeId) {
        self.asts
            .annotate_type(id, TypeIdWithAssignability::new(type_id, false).to_raw());
    }

    // --- name resolution ----------------------------------------------------

    fn resolve(&mut self, name: IdentifierId) -> Binding {
        for (out, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(rank) = scope.iter().position(|&n| n == name) {
                return Binding::Scope {
                    out: out as u16,
                    rank: rank as u16,
                };
            }
        }

        let rank = match self.globals.iter().position(|&n| n == name) {
            Some(rank) => rank,
            None => {
                // Forward reference to a name defined later (or never);
                // allocate its global slot now.
                self.globals.push(name);

                self.globals.len() - 1
            }
        };

        Binding::Global { rank: rank as u16 }
    }

    fn bind_local(&mut self, name: IdentifierId) {
        self.scopes
            .last_mut()
            .expect("bind_local called outside any scope")
            .push(name);
    }

    // --- expression lowering ------------------------------------------------

    /// Lowers one expression; with `consuming`, its final instruction takes
    /// the write-context bit.
    fn lower_expr(
        &mut self,
        id: AstNodeId,
        ops: &mut Vec<PendingOp>,
        consuming: bool,
    ) -> LowerResult<()> {
        let node = self.asts.node(id);
        let tag = node.tag();
        let flags = node.flags();
        let kind = node.op_kind();
        let source = node.source();

        match tag {
            AstTag::File => unreachable!("File nodes are lowered via lower_file"),
            AstTag::Identifier => {
                let name = IdentifierId::from_raw(self.asts.node(id).ident_payload());

                if name == self.undefined_name {
                    Self::push(ops, Op::Undefined, consuming);

                    return Ok(());
                }

                let op = match self.resolve(name) {
                    Binding::Scope { out, rank } => Op::LoadScope { out, rank },
                    Binding::Global { rank } => Op::LoadGlobal {
                        file_index: self.file_index,
                        rank,
                    },
                };

                Self::push(ops, op, consuming);
            }
            AstTag::LitInt => {
                let value = self.asts.node(id).int_payload();

                self.annotate_comptime(id, TypeTag::CompInteger);

                Self::push(
                    ops,
                    Op::ValueInteger {
                        value: CompIntegerValue::from_u64(value),
                    },
                    consuming,
                );
            }
            AstTag::LitFloat => {
                let value = self.asts.node(id).float_payload();

                self.annotate_comptime(id, TypeTag::CompFloat);

                Self::push(
                    ops,
                    Op::ValueFloat {
                        value: CompFloatValue::from_f64(value),
                    },
                    consuming,
                );
            }
            AstTag::LitChar => {
                let utf8 = self.asts.node(id).char_payload();

                self.annotate_comptime(id, TypeTag::CompInteger);

                Self::push(
                    ops,
                    Op::ValueInteger {
                        value: CompIntegerValue::from_u64(u64::from(u32::from_le_bytes(utf8))),
                    },
                    consuming,
                );
            }
            AstTag::LitString => {
                let value = self.asts.node(id).string_payload();

                self.annotate_comptime(id, TypeTag::CompString);

                Self::push(
                    ops,
                    Op::ValueString {
                        value: ForeverValueId::from_raw(value),
                    },
                    consuming,
                );
            }
            AstTag::BinaryOp => {
                self.lower_binary_op(id, kind, source, ops, consuming)?;
            }
            AstTag::UnaryOp => {
                let operand = self.child_ids(id)[0];

                let unary = UnaryOpKind::from_u8(kind)
                    .unwrap_or_else(|| panic!("corrupt AST: unknown unary op kind {kind}"));

                match unary {
                    UnaryOpKind::Try => {
                        // Propagate failure: return early when the operand
                        // produced an error.
                        let propagate = self.emit_stream(|_, ops| {
                            Self::push(ops, Op::Return, false);

                            Ok(())
                        })?;

                        self.lower_expr(operand, ops, false)?;
                        Self::push(ops, Op::If { consequent: propagate }, consuming);
                    }
                    other => {
                        self.lower_expr(operand, ops, false)?;

                        let op = match other {
                            UnaryOpKind::BitNot => Op::BitNot,
                            UnaryOpKind::LogNot => Op::LogicalNot,
                            UnaryOpKind::Deref => Op::Dereference,
                            UnaryOpKind::AddressOf => Op::AddressOf,
                            UnaryOpKind::Neg => Op::Negate,
                            UnaryOpKind::Try => unreachable!("handled above"),
                        };

                        Self::push(ops, op, consuming);
                    }
                }
            }
            AstTag::Definition => self.lower_definition(id, ops)?,
            AstTag::Block => self.lower_block(id, ops)?,
            AstTag::If => {
                let children = self.child_ids(id);
                let mut cursor = 0;

                if flags.contains(AstFlags::HAS_INIT) {
                    self.lower_expr(children[cursor], ops, false)?;
                    cursor += 1;
                }

                let condition = children[cursor];
                let body = children[cursor + 1];

                let consequent = self.emit_stream(|this, ops| this.lower_expr(body, ops, false))?;

                let alternative = if flags.contains(AstFlags::HAS_ELSE) {
                    let else_body = children[cursor + 2];

                    Some(self.emit_stream(|this, ops| this.lower_expr(else_body, ops, false))?)
                } else {
                    None
                };

                self.lower_expr(condition, ops, false)?;

                match alternative {
                    Some(alternative) => Self::push(
                        ops,
                        Op::IfElse {
                            consequent,
                            alternative,
                        },
                        consuming,
                    ),
                    None => Self::push(ops, Op::If { consequent }, consuming),
                }
            }
            AstTag::For => self.lower_for(id, flags, ops)?,
            AstTag::Switch => self.lower_switch(id, flags, ops)?,
            AstTag::Case => unreachable!("Case nodes are lowered by their Switch"),
            AstTag::Return => {
                if flags.contains(AstFlags::HAS_VALUE) {
                    let value = self.child_ids(id)[0];

                    self.lower_expr(value, ops, false)?;
                } else {
                    Self::push(ops, Op::ValueVoid, false);
                }

                Self::push(ops, Op::Return, consuming);
            }
            AstTag::Break => {
                // The loop body stream ends here; the interpreter unwinds to
                // the loop.
                Self::push(ops, Op::ValueVoid, false);
                Self::push(ops, Op::Return, consuming);
            }
            AstTag::Defer => {
                let body = self.child_ids(id)[0];

                let deferred = self.emit_stream(|this, ops| this.lower_expr(body, ops, false))?;

                Self::push(ops, Op::BindBody { body: deferred }, consuming);
            }
            AstTag::Impl => {
                let children = self.child_ids(id);

                self.lower_expr(children[0], ops, false)?;
                self.lower_expr(children[1], ops, consuming)?;
            }
            AstTag::Call => {
                let children = self.child_ids(id);

                self.lower_expr(children[0], ops, false)?;

                let mut arguments = Vec::with_capacity(children.len() - 1);

                for &argument in &children[1..] {
                    let callback =
                        self.emit_stream(|this, ops| this.lower_expr(argument, ops, false))?;

                    arguments.push((IdentifierId::INVALID, callback));
                }

                Self::push(ops, Op::PrepareArgs { arguments }, false);
                Self::push(ops, Op::ExecArgs, false);
                Self::push(ops, Op::Call, consuming);
            }
            AstTag::PtrType | AstTag::SliceType | AstTag::MultiPtrType | AstTag::RefType
            | AstTag::VariadicType => {
                let element = self.child_ids(id)[0];

                self.lower_expr(element, ops, false)?;

                let mut reference_flags = match tag {
                    AstTag::SliceType | AstTag::VariadicType => ReferenceTypeFlags::IS_SLICE,
                    AstTag::MultiPtrType => ReferenceTypeFlags::IS_MULTI,
                    _ => ReferenceTypeFlags::empty(),
                };

                if flags.contains(AstFlags::IS_MUT) {
                    reference_flags |= ReferenceTypeFlags::IS_MUT;
                }

                Self::push(ops, Op::ReferenceType { flags: reference_flags }, consuming);
            }
            AstTag::ArrayType => {
                let children = self.child_ids(id);

                self.lower_expr(children[0], ops, false)?;
                self.lower_expr(children[1], ops, false)?;
                Self::push(ops, Op::ArrayType, consuming);
            }
            AstTag::ProcSignature | AstTag::FuncSignature | AstTag::TraitSignature => {
                self.lower_signature(id, tag, flags, ops, consuming)?;
            }
        }

        Ok(())
    }

    fn lower_binary_op(
        &mut self,
        id: AstNodeId,
        kind: u8,
        source: SourceId,
        ops: &mut Vec<PendingOp>,
        consuming: bool,
    ) -> LowerResult<()> {
        let children = self.child_ids(id);
        let lhs = children[0];
        let rhs = children[1];

        let kind = BinaryOpKind::from_u8(kind)
            .unwrap_or_else(|| panic!("corrupt AST: unknown binary op kind {kind}"));

        if let Some(arith) = arithmetic_kind(kind) {
            self.lower_expr(lhs, ops, false)?;
            self.lower_expr(rhs, ops, false)?;
            Self::push(ops, Op::BinaryArithmeticOp { kind: arith }, consuming);

            return Ok(());
        }

        if let Some(compare) = compare_kind(kind) {
            self.lower_expr(lhs, ops, false)?;
            self.lower_expr(rhs, ops, false)?;
            self.annotate_comptime(id, TypeTag::Boolean);
            Self::push(ops, Op::Compare { kind: compare }, consuming);

            return Ok(());
        }

        match kind {
            BinaryOpKind::ShiftL | BinaryOpKind::ShiftR => {
                self.lower_expr(lhs, ops, false)?;
                self.lower_expr(rhs, ops, false)?;

                let kind = if kind == BinaryOpKind::ShiftL {
                    ShiftKind::Left
                } else {
                    ShiftKind::Right
                };

                Self::push(ops, Op::Shift { kind }, consuming);
            }
            BinaryOpKind::BitAnd | BinaryOpKind::BitOr | BinaryOpKind::BitXor => {
                self.lower_expr(lhs, ops, false)?;
                self.lower_expr(rhs, ops, false)?;

                let kind = match kind {
                    BinaryOpKind::BitAnd => BitwiseKind::And,
                    BinaryOpKind::BitOr => BitwiseKind::Or,
                    _ => BitwiseKind::Xor,
                };

                Self::push(ops, Op::BinaryBitwiseOp { kind }, consuming);
            }
            BinaryOpKind::LogAnd => {
                self.lower_expr(lhs, ops, false)?;
                self.lower_expr(rhs, ops, false)?;
                Self::push(ops, Op::LogicalAnd, consuming);
            }
            BinaryOpKind::LogOr => {
                self.lower_expr(lhs, ops, false)?;
                self.lower_expr(rhs, ops, false)?;
                Self::push(ops, Op::LogicalOr, consuming);
            }
            BinaryOpKind::Member => {
                self.lower_expr(lhs, ops, false)?;

                let rhs_node = self.asts.node(rhs);

                if rhs_node.tag() != AstTag::Identifier {
                    return Err(LowerError::InvalidMemberAccess { node_source: source });
                }

                let name = IdentifierId::from_raw(rhs_node.ident_payload());

                Self::push(ops, Op::LoadMember { name }, consuming);
            }
            BinaryOpKind::Index => {
                self.lower_expr(lhs, ops, false)?;
                self.lower_expr(rhs, ops, false)?;
                Self::push(ops, Op::Index, consuming);
            }
            BinaryOpKind::Catch => {
                let handler = self.emit_stream(|this, ops| this.lower_expr(rhs, ops, false))?;

                self.lower_expr(lhs, ops, false)?;
                Self::push(ops, Op::If { consequent: handler }, consuming);
            }
            BinaryOpKind::Set
            | BinaryOpKind::SetAdd
            | BinaryOpKind::SetSub
            | BinaryOpKind::SetMul
            | BinaryOpKind::SetDiv
            | BinaryOpKind::SetMod
            | BinaryOpKind::SetBitAnd
            | BinaryOpKind::SetBitOr
            | BinaryOpKind::SetBitXor
            | BinaryOpKind::SetShiftL
            | BinaryOpKind::SetShiftR => {
                self.lower_assignment(kind, lhs, rhs, source, ops)?;
            }
            _ => unreachable!("kind handled above"),
        }

        Ok(())
    }

    fn lower_assignment(
        &mut self,
        kind: BinaryOpKind,
        lhs: AstNodeId,
        rhs: AstNodeId,
        source: SourceId,
        ops: &mut Vec<PendingOp>,
    ) -> LowerResult<()> {
        let lhs_node = self.asts.node(lhs);

        let is_place = match lhs_node.tag() {
            AstTag::Identifier => true,
            AstTag::BinaryOp => matches!(
                BinaryOpKind::from_u8(lhs_node.op_kind()),
                Some(BinaryOpKind::Member) | Some(BinaryOpKind::Index)
            ),
            AstTag::UnaryOp => {
                matches!(UnaryOpKind::from_u8(lhs_node.op_kind()), Some(UnaryOpKind::Deref))
            }
            _ => false,
        };

        if !is_place {
            return Err(LowerError::InvalidAssignmentTarget { node_source: source });
        }

        self.lower_expr(lhs, ops, false)?;
        Self::push(ops, Op::SetWriteCtx, false);

        match kind {
            BinaryOpKind::Set => {
                self.lower_expr(rhs, ops, true)?;
            }
            compound => {
                self.lower_expr(lhs, ops, false)?;
                self.lower_expr(rhs, ops, false)?;

                let op = match compound {
                    BinaryOpKind::SetAdd => Op::BinaryArithmeticOp {
                        kind: ArithmeticKind::Add,
                    },
                    BinaryOpKind::SetSub => Op::BinaryArithmeticOp {
                        kind: ArithmeticKind::Sub,
                    },
                    BinaryOpKind::SetMul => Op::BinaryArithmeticOp {
                        kind: ArithmeticKind::Mul,
                    },
                    BinaryOpKind::SetDiv => Op::BinaryArithmeticOp {
                        kind: ArithmeticKind::Div,
                    },
                    BinaryOpKind::SetMod => Op::BinaryArithmeticOp {
                        kind: ArithmeticKind::Mod,
                    },
                    BinaryOpKind::SetBitAnd => Op::BinaryBitwiseOp {
                        kind: BitwiseKind::And,
                    },
                    BinaryOpKind::SetBitOr => Op::BinaryBitwiseOp {
                        kind: BitwiseKind::Or,
                    },
                    BinaryOpKind::SetBitXor => Op::BinaryBitwiseOp {
                        kind: BitwiseKind::Xor,
                    },
                    BinaryOpKind::SetShiftL => Op::Shift {
                        kind: ShiftKind::Left,
                    },
                    BinaryOpKind::SetShiftR => Op::Shift {
                        kind: ShiftKind::Right,
                    },
                    _ => unreachable!("not an assignment kind"),
                };

                Self::push(ops, op, true);
            }
        }

        Ok(())
    }

    fn lower_definition(&mut self, id: AstNodeId, ops: &mut Vec<PendingOp>) -> LowerResult<()> {
        let node = self.asts.node(id);
        let flags = node.flags();
        let name = IdentifierId::from_raw(node.ident_payload());

        let children = self.child_ids(id);
        let mut cursor = 0;

        let has_type = flags.contains(AstFlags::HAS_TYPE);
        let is_mut = flags.contains(AstFlags::IS_MUT);

        if has_type {
            self.lower_expr(children[cursor], ops, false)?;
            cursor += 1;
        }

        if flags.contains(AstFlags::HAS_VALUE) {
            self.lower_expr(children[cursor], ops, false)?;
        } else {
            Self::push(ops, Op::Undefined, false);
        }

        if self.scopes.is_empty() {
            let rank = match self.globals.iter().position(|&n| n == name) {
                Some(rank) => rank,
                None => {
                    self.globals.push(name);

                    self.globals.len() - 1
                }
            } as u16;

            let op = if has_type {
                Op::FileGlobalAllocTyped {
                    is_mut,
                    file_index: self.file_index,
                    rank,
                }
            } else {
                Op::FileGlobalAllocUntyped {
                    is_mut,
                    file_index: self.file_index,
                    rank,
                }
            };

            Self::push(ops, op, false);
        } else {
            self.bind_local(name);

            let op = if has_type {
                Op::ScopeAllocTyped { is_mut }
            } else {
                Op::ScopeAllocUntyped { is_mut }
            };

            Self::push(ops, op, false);
        }

        Ok(())
    }

    fn lower_block(&mut self, id: AstNodeId, ops: &mut Vec<PendingOp>) -> LowerResult<()> {
        let children = self.child_ids(id);

        let definition_count = children
            .iter()
            .filter(|&&c| self.asts.node(c).tag() == AstTag::Definition)
            .count() as u16;

        Self::push(
            ops,
            Op::ScopeBegin {
                member_count: definition_count,
            },
            false,
        );

        self.scopes.push(Vec::new());

        let result: LowerResult<()> = (|| {
            for child in children {
                self.lower_expr(child, ops, false)?;
            }

            Ok(())
        })();

        self.scopes.pop();

        result?;

        Self::push(ops, Op::ScopeEnd, false);

        Ok(())
    }

    fn lower_for(
        &mut self,
        id: AstNodeId,
        flags: AstFlags,
        ops: &mut Vec<PendingOp>,
    ) -> LowerResult<()> {
        let children = self.child_ids(id);
        let mut cursor = 0;

        if flags.contains(AstFlags::HAS_INIT) {
            self.lower_expr(children[cursor], ops, false)?;
            cursor += 1;
        }

        if flags.contains(AstFlags::IS_FOR_EACH) {
            // Bindings for the element (and optional index), then the
            // iterated expression, then the loop itself.
            let mut names = vec![IdentifierId::from_raw(
                self.asts.node(children[cursor]).ident_payload(),
            )];

            cursor += 1;

            if flags.contains(AstFlags::HAS_INDEX) {
                names.push(IdentifierId::from_raw(
                    self.asts.node(children[cursor]).ident_payload(),
                ));
                cursor += 1;
            }

            let iterated = children[cursor];

            cursor += 1;

            Self::push(
                ops,
                Op::ScopeBegin {
                    member_count: names.len() as u16,
                },
                false,
            );

            self.scopes.push(Vec::new());

            let result: LowerResult<()> = (|| {
                for &name in &names {
                    Self::push(ops, Op::Undefined, false);
                    Self::push(ops, Op::ScopeAllocUntyped { is_mut: true }, false);
                    self.bind_local(name);
                }

                let condition =
                    self.emit_stream(|this, ops| this.lower_expr(iterated, ops, false))?;

                let body_id = children[cursor];

                let body = self.emit_stream(|this, ops| this.lower_expr(body_id, ops, false))?;

                if flags.contains(AstFlags::HAS_FINALLY) {
                    let finally_id = children[cursor + 1];

                    let finally =
                        self.emit_stream(|this, ops| this.lower_expr(finally_id, ops, false))?;

                    Self::push(
                        ops,
                        Op::LoopFinally {
                            condition,
                            body,
                            finally,
                        },
                        false,
                    );
                } else {
                    Self::push(ops, Op::Loop { condition, body }, false);
                }

                Ok(())
            })();

            self.scopes.pop();

            result?;

            Self::push(ops, Op::ScopeEnd, false);

            return Ok(());
        }

        let condition = if flags.contains(AstFlags::HAS_CONDITION) {
            let condition_id = children[cursor];

            cursor += 1;

            self.emit_stream(|this, ops| this.lower_expr(condition_id, ops, false))?
        } else {
            // Infinite loop: an empty condition stream.
            self.emit_stream(|_, _| Ok(()))?
        };

        let body_id = children[cursor];

        let body = self.emit_stream(|this, ops| this.lower_expr(body_id, ops, false))?;

        if flags.contains(AstFlags::HAS_FINALLY) {
            let finally_id = children[cursor + 1];

            let finally = self.emit_stream(|this, ops| this.lower_expr(finally_id, ops, false))?;

            Self::push(
                ops,
                Op::LoopFinally {
                    condition,
                    body,
                    finally,
                },
                false,
            );
        } else {
            Self::push(ops, Op::Loop { condition, body }, false);
        }

        Ok(())
    }

    fn lower_switch(
        &mut self,
        id: AstNodeId,
        flags: AstFlags,
        ops: &mut Vec<PendingOp>,
    ) -> LowerResult<()> {
        let children = self.child_ids(id);
        let mut cursor = 0;

        if flags.contains(AstFlags::HAS_INIT) {
            self.lower_expr(children[cursor], ops, false)?;
            cursor += 1;
        }

        let switched = children[cursor];

        cursor += 1;

        // Each clause becomes a guarded If; the switched expression is
        // re-evaluated per comparison.
        for &case in &children[cursor..] {
            let case_children = self.child_ids(case);
            let (labels, body) = case_children
                .split_at(case_children.len() - 1);

            let body = body[0];

            let consequent = self.emit_stream(|this, ops| this.lower_expr(body, ops, false))?;

            for (i, &label) in labels.iter().enumerate() {
                self.lower_expr(switched, ops, false)?;
                self.lower_expr(label, ops, false)?;
                Self::push(ops, Op::Compare { kind: CompareKind::Eq }, false);

                if i != 0 {
                    Self::push(ops, Op::LogicalOr, false);
                }
            }

            Self::push(ops, Op::If { consequent }, false);
        }

        Ok(())
    }

    fn lower_signature(
        &mut self,
        id: AstNodeId,
        tag: AstTag,
        flags: AstFlags,
        ops: &mut Vec<PendingOp>,
        consuming: bool,
    ) -> LowerResult<()> {
        let children = self.child_ids(id);

        let has_return_type = flags.contains(AstFlags::HAS_RETURN_TYPE);
        let has_body = flags.contains(AstFlags::HAS_BODY);

        let parameter_count = children.len() - usize::from(has_return_type) - usize::from(has_body);
        let parameter_ids = &children[..parameter_count];

        let mut parameters = Vec::with_capacity(parameter_count);

        for &parameter in parameter_ids {
            let node = self.asts.node(parameter);
            let parameter_flags = node.flags();

            let mut encoded = SignatureParameterFlags::empty();

            if parameter_flags.contains(AstFlags::IS_MUT) {
                encoded |= SignatureParameterFlags::IS_MUT;
            }

            if parameter_flags.contains(AstFlags::HAS_TYPE) {
                encoded |= SignatureParameterFlags::HAS_TYPE;
            }

            if parameter_flags.contains(AstFlags::HAS_VALUE) {
                encoded |= SignatureParameterFlags::HAS_DEFAULT;
            }

            parameters.push(SignatureParameter {
                name: IdentifierId::from_raw(node.ident_payload()),
                flags: encoded,
            });
        }

        // The return type is an ordinary expression evaluated before the
        // signature itself.
        if has_return_type {
            let return_type = children[parameter_count];

            self.lower_expr(return_type, ops, false)?;
        }

        let signature_flags = if tag == AstTag::FuncSignature {
            SignatureFlags::IS_FUNC
        } else {
            SignatureFlags::empty()
        };

        // Without a body the signature itself is the produced value and
        // takes the write-context bit when asked to.
        Self::push(
            ops,
            Op::Signature {
                flags: signature_flags,
                value_count: u8::from(has_return_type),
                parameters: parameters.clone(),
            },
            consuming && !has_body,
        );

        // Parameter completion, in rank order.
        for (rank, (&parameter, encoded)) in
            parameter_ids.iter().zip(parameters.iter()).enumerate()
        {
            let parameter_children = self.child_ids(parameter);
            let mut child_cursor = 0;

            let rank = rank as u8;

            if encoded.flags.contains(SignatureParameterFlags::HAS_TYPE) {
                self.lower_expr(parameter_children[child_cursor], ops, false)?;
                child_cursor += 1;

                if encoded.flags.contains(SignatureParameterFlags::HAS_DEFAULT) {
                    self.lower_expr(parameter_children[child_cursor], ops, false)?;
                    Self::push(ops, Op::CompleteParamTypedWithDefault { rank }, false);
                } else {
                    Self::push(ops, Op::CompleteParamTypedNoDefault { rank }, false);
                }
            } else {
                if encoded.flags.contains(SignatureParameterFlags::HAS_DEFAULT) {
                    self.lower_expr(parameter_children[child_cursor], ops, false)?;
                }

                Self::push(ops, Op::CompleteParamUntyped { rank }, false);
            }
        }

        if has_body {
            let body_id = children[children.len() - 1];

            let parameter_names: Vec<IdentifierId> =
                parameters.iter().map(|p| p.name).collect();

            self.scopes.push(parameter_names);

            let body = self.emit_stream(|this, ops| this.lower_expr(body_id, ops, false));

            self.scopes.pop();

            Self::push(ops, Op::BindBody { body: body? }, consuming);
        }

        Ok(())
    }
}

fn arithmetic_kind(kind: BinaryOpKind) -> Option<ArithmeticKind> {
    Some(match kind {
        BinaryOpKind::Add => ArithmeticKind::Add,
        BinaryOpKind::Sub => ArithmeticKind::Sub,
        BinaryOpKind::Mul => ArithmeticKind::Mul,
        BinaryOpKind::Div => ArithmeticKind::Div,
        BinaryOpKind::Mod => ArithmeticKind::Mod,
        _ => return None,
    })
}

fn compare_kind(kind: BinaryOpKind) -> Option<CompareKind> {
    Some(match kind {
        BinaryOpKind::CmpLt => CompareKind::Lt,
        BinaryOpKind::CmpLe => CompareKind::Le,
        BinaryOpKind::CmpGt => CompareKind::Gt,
        BinaryOpKind::CmpGe => CompareKind::Ge,
        BinaryOpKind::CmpNe => CompareKind::Ne,
        BinaryOpKind::CmpEq => CompareKind::Eq,
        _ => return None,
    })
}
