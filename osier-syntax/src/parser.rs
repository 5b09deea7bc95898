//! Parser: tokens to a flattened AST.
//!
//! Top-level forms are recursive descent; expressions run through an
//! explicit-stack shunting-yard so worst-case stack usage is bounded by the
//! operator nesting, not the expression length.

use osier_pool::{IdentifierId, IdentifierPool};

use crate::ast::{
    AstBuilderToken, AstFlags, AstPool, AstNodeId, AstTag, BinaryOpKind, SourceId, UnaryOpKind,
    AST_BUILDER_NO_CHILDREN,
};
use crate::token::{ByteRange, Token, TokenTag};

/// Parse failure. Parsing halts at the first error; the partially built AST
/// is abandoned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Ran out of tokens mid-form.
    #[error("{context}: unexpectedly ran out of input tokens")]
    UnexpectedEndOfStream {
        /// Grammar production being parsed.
        context: &'static str,
    },
    /// A specific token was required.
    #[error("{context}: expected {expected} but found {got} on line {line}")]
    UnexpectedToken {
        /// Grammar production being parsed.
        context: &'static str,
        /// The tag that was required.
        expected: TokenTag,
        /// The tag that was found.
        got: TokenTag,
        /// 1-based source line of the offending token.
        line: u32,
        /// Bytes of the offending token.
        range: ByteRange,
    },
    /// The tokens do not form a valid production.
    #[error("{context}: {message} (line {line})")]
    InvalidSyntax {
        /// Grammar production being parsed.
        context: &'static str,
        /// Human-readable description.
        message: &'static str,
        /// 1-based source line of the offending token.
        line: u32,
        /// Bytes of the offending token.
        range: ByteRange,
    },
    /// A pool refused an allocation.
    #[error("{context}: out of memory")]
    OutOfMemory {
        /// Grammar production being parsed.
        context: &'static str,
    },
}

type ParseResult<T> = Result<T, ParseError>;

/// Parses `tokens` (lexed from `source`) into `asts`, returning the id of the
/// `File` root node.
///
/// Identifier names are interned into `identifiers`; decoded string literal
/// values are interned by identity into `strings`.
pub fn parse(
    tokens: &[Token],
    source: &[u8],
    identifiers: &mut IdentifierPool,
    strings: &mut IdentifierPool,
    asts: &mut AstPool,
) -> ParseResult<AstNodeId> {
    let mut p = Parser {
        tokens,
        source,
        cursor: 0,
        identifiers,
        strings,
        asts,
    };

    let result = p.parse_file();

    if result.is_err() {
        p.asts.discard_pending();
    }

    result
}

fn source_of(token: &Token) -> SourceId {
    SourceId::new(token.range.begin)
}

/// One pending shunting-yard operator.
#[derive(Clone, Copy)]
struct SyOp {
    prec: u8,
    left_assoc: bool,
    node: SyNode,
    source: SourceId,
}

#[derive(Clone, Copy)]
enum SyNode {
    Binary(BinaryOpKind),
    Unary(UnaryOpKind),
    /// Prefix type constructor; `has_bound` marks `[len]T`, which consumes an
    /// extra pushed operand for the length.
    TypePrefix {
        tag: AstTag,
        flags: AstFlags,
        has_bound: bool,
    },
    ParenSentinel,
}

fn binary_sy_op(tag: TokenTag, source: SourceId) -> Option<SyOp> {
    let (prec, kind) = match tag {
        TokenTag::Dot => (1, BinaryOpKind::Member),
        TokenTag::OpMulOrPtr => (3, BinaryOpKind::Mul),
        TokenTag::OpDiv => (3, BinaryOpKind::Div),
        TokenTag::OpMod => (3, BinaryOpKind::Mod),
        TokenTag::OpAdd => (4, BinaryOpKind::Add),
        TokenTag::OpSub => (4, BinaryOpKind::Sub),
        TokenTag::OpShiftLeft => (5, BinaryOpKind::ShiftL),
        TokenTag::OpShiftRight => (5, BinaryOpKind::ShiftR),
        TokenTag::OpCmpLt => (6, BinaryOpKind::CmpLt),
        TokenTag::OpCmpLe => (6, BinaryOpKind::CmpLe),
        TokenTag::OpCmpGt => (6, BinaryOpKind::CmpGt),
        TokenTag::OpCmpGe => (6, BinaryOpKind::CmpGe),
        TokenTag::OpCmpNe => (7, BinaryOpKind::CmpNe),
        TokenTag::OpCmpEq => (7, BinaryOpKind::CmpEq),
        TokenTag::OpBitAndOrRef => (8, BinaryOpKind::BitAnd),
        TokenTag::OpBitXor => (9, BinaryOpKind::BitXor),
        TokenTag::OpBitOr => (10, BinaryOpKind::BitOr),
        TokenTag::OpLogAnd => (11, BinaryOpKind::LogAnd),
        TokenTag::OpLogOr => (12, BinaryOpKind::LogOr),
        _ => return None,
    };

    Some(SyOp {
        prec,
        left_assoc: true,
        node: SyNode::Binary(kind),
        source,
    })
}

fn unary_sy_op(tag: TokenTag, source: SourceId) -> Option<SyOp> {
    let (prec, kind) = match tag {
        TokenTag::UOpBitNot => (2, UnaryOpKind::BitNot),
        TokenTag::UOpLogNot => (2, UnaryOpKind::LogNot),
        TokenTag::UOpDeref => (2, UnaryOpKind::Deref),
        TokenTag::OpBitAndOrRef => (2, UnaryOpKind::AddressOf),
        TokenTag::OpSub => (2, UnaryOpKind::Neg),
        TokenTag::Try => (13, UnaryOpKind::Try),
        _ => return None,
    };

    Some(SyOp {
        prec,
        left_assoc: false,
        node: SyNode::Unary(kind),
        source,
    })
}

fn assignment_kind(tag: TokenTag) -> Option<BinaryOpKind> {
    Some(match tag {
        TokenTag::Set => BinaryOpKind::Set,
        TokenTag::SetAdd => BinaryOpKind::SetAdd,
        TokenTag::SetSub => BinaryOpKind::SetSub,
        TokenTag::SetMul => BinaryOpKind::SetMul,
        TokenTag::SetDiv => BinaryOpKind::SetDiv,
        TokenTag::SetMod => BinaryOpKind::SetMod,
        TokenTag::SetBitAnd => BinaryOpKind::SetBitAnd,
        TokenTag::SetBitOr => BinaryOpKind::SetBitOr,
        TokenTag::SetBitXor => BinaryOpKind::SetBitXor,
        TokenTag::SetShiftLeft => BinaryOpKind::SetShiftL,
        TokenTag::SetShiftRight => BinaryOpKind::SetShiftR,
        TokenTag::Catch => BinaryOpKind::Catch,
        _ => return None,
    })
}

struct Parser<'a> {
    tokens: &'a [Token],
    source: &'a [u8],
    cursor: usize,
    identifiers: &'a mut IdentifierPool,
    strings: &'a mut IdentifierPool,
    asts: &'a mut AstPool,
}

impl<'a> Parser<'a> {
    fn peek(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + offset)
    }

    fn peek_tag(&self, offset: usize) -> Option<TokenTag> {
        self.peek(offset).map(|t| t.tag)
    }

    fn next(&mut self, context: &'static str) -> ParseResult<Token> {
        let token = self
            .tokens
            .get(self.cursor)
            .copied()
            .ok_or(ParseError::UnexpectedEndOfStream { context })?;

        self.cursor += 1;

        Ok(token)
    }

    fn expect(&mut self, context: &'static str, expected: TokenTag) -> ParseResult<Token> {
        let token = self.next(context)?;

        if token.tag != expected {
            return Err(ParseError::UnexpectedToken {
                context,
                expected,
                got: token.tag,
                line: token.line_number,
                range: token.range,
            });
        }

        Ok(token)
    }

    fn next_if(&mut self, expected: TokenTag) -> Option<Token> {
        let token = *self.peek(0)?;

        if token.tag != expected {
            return None;
        }

        self.cursor += 1;

        Some(token)
    }

    fn invalid(
        &self,
        context: &'static str,
        message: &'static str,
        token: &Token,
    ) -> ParseError {
        ParseError::InvalidSyntax {
            context,
            message,
            line: token.line_number,
            range: token.range,
        }
    }

    fn intern(&mut self, token: &Token) -> IdentifierId {
        let bytes = token.bytes(self.source);

        self.identifiers.index_from(bytes)
    }

    // --- top-level forms ----------------------------------------------------

    fn parse_file(&mut self) -> ParseResult<AstNodeId> {
        let mut first: Option<AstBuilderToken> = None;

        while self.peek(0).is_some() {
            let child = self.parse_top_level_expr(true)?;

            first.get_or_insert(child);
        }

        let _file = self.asts.push_node(
            first.unwrap_or(AST_BUILDER_NO_CHILDREN),
            SourceId::new(0),
            AstFlags::empty(),
            AstTag::File,
        );

        Ok(self.asts.complete_ast())
    }

    fn parse_top_level_expr(&mut self, allow_assignment: bool) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "TopLevelExpr";

        let t = *self
            .peek(0)
            .ok_or(ParseError::UnexpectedEndOfStream { context: CTX })?;

        match t.tag {
            TokenTag::If => return self.parse_if(),
            TokenTag::For => return self.parse_for(),
            TokenTag::Switch => return self.parse_switch(),
            TokenTag::CurlyBeg => return self.parse_block(),
            TokenTag::Return => return self.parse_return(),
            TokenTag::Break => return self.parse_break(),
            TokenTag::Defer => return self.parse_defer(),
            TokenTag::Impl => return self.parse_impl(),
            TokenTag::Pub => return self.parse_definition(),
            TokenTag::Ident
                if matches!(
                    self.peek_tag(1),
                    Some(TokenTag::Colon) | Some(TokenTag::DoubleColon)
                ) =>
            {
                return self.parse_definition()
            }
            TokenTag::IncompleteComment => {
                return Err(self.invalid(CTX, "Unterminated block comment", &t))
            }
            _ => {}
        }

        let simple = self.parse_simple_expr()?;

        if allow_assignment {
            if let Some(t) = self.peek(0).copied() {
                if let Some(kind) = assignment_kind(t.tag) {
                    self.cursor += 1;

                    let _rhs = self.parse_top_level_expr(false)?;

                    return Ok(self.asts.push_node_with(
                        simple,
                        source_of(&t),
                        AstFlags::empty(),
                        AstTag::BinaryOp,
                        kind as u8,
                        &[],
                    ));
                }
            }
        }

        Ok(simple)
    }

    fn parse_definition(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Definition";

        let mut flags = AstFlags::HAS_IDENT;

        if self.next_if(TokenTag::Pub).is_some() {
            flags |= AstFlags::IS_PUB;
        }

        let ident = self.expect(CTX, TokenTag::Ident)?;
        let name = self.intern(&ident);

        let sep = self.next(CTX)?;

        let mut first: Option<AstBuilderToken> = None;

        match sep.tag {
            TokenTag::DoubleColon => {
                flags |= AstFlags::IS_COMPTIME | AstFlags::HAS_VALUE;

                let value = self.parse_top_level_expr(false)?;

                first = Some(value);
            }
            TokenTag::Colon => {
                if self.peek_tag(0) != Some(TokenTag::Set) {
                    let ty = self.parse_simple_expr()?;

                    flags |= AstFlags::HAS_TYPE;
                    first = Some(ty);
                }

                if self.next_if(TokenTag::Set).is_some() {
                    let value = self.parse_top_level_expr(false)?;

                    flags |= AstFlags::HAS_VALUE;
                    first.get_or_insert(value);
                }

                if !flags.intersects(AstFlags::HAS_TYPE | AstFlags::HAS_VALUE) {
                    return Err(self.invalid(
                        CTX,
                        "Definition requires a type, a value, or both",
                        &sep,
                    ));
                }
            }
            _ => {
                return Err(ParseError::UnexpectedToken {
                    context: CTX,
                    expected: TokenTag::Colon,
                    got: sep.tag,
                    line: sep.line_number,
                    range: sep.range,
                })
            }
        }

        Ok(self.asts.push_node_with(
            first.unwrap_or(AST_BUILDER_NO_CHILDREN),
            source_of(&ident),
            flags,
            AstTag::Definition,
            0,
            &[name.to_raw()],
        ))
    }

    /// `name :` / `name ::` lookahead shared by the control-flow forms.
    fn peek_initializer(&self) -> bool {
        self.peek_tag(0) == Some(TokenTag::Ident)
            && matches!(
                self.peek_tag(1),
                Some(TokenTag::Colon) | Some(TokenTag::DoubleColon)
            )
    }

    fn parse_if(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "If";

        let kw = self.expect(CTX, TokenTag::If)?;

        let mut flags = AstFlags::empty();
        let mut first: Option<AstBuilderToken> = None;

        if self.peek_initializer() {
            let init = self.parse_definition()?;

            self.expect(CTX, TokenTag::Semicolon)?;

            flags |= AstFlags::HAS_INIT;
            first = Some(init);
        }

        let condition = self.parse_simple_expr()?;

        first.get_or_insert(condition);

        let _ = self.next_if(TokenTag::Then);

        let _body = self.parse_top_level_expr(false)?;

        if self.next_if(TokenTag::Else).is_some() {
            let _else_body = self.parse_top_level_expr(false)?;

            flags |= AstFlags::HAS_ELSE;
        }

        Ok(self.asts.push_node(
            first.expect("if has at least a condition"),
            source_of(&kw),
            flags,
            AstTag::If,
        ))
    }

    fn parse_for(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "For";

        let kw = self.expect(CTX, TokenTag::For)?;

        let mut flags = AstFlags::empty();
        let mut first: Option<AstBuilderToken> = None;

        if self.peek_initializer() {
            let init = self.parse_definition()?;

            self.expect(CTX, TokenTag::Semicolon)?;

            flags |= AstFlags::HAS_INIT;
            first = Some(init);
        }

        let is_for_each = self.peek_tag(0) == Some(TokenTag::Ident)
            && matches!(
                self.peek_tag(1),
                Some(TokenTag::Comma) | Some(TokenTag::ArrowLeft)
            );

        if is_for_each {
            flags |= AstFlags::IS_FOR_EACH;

            let element = self.expect(CTX, TokenTag::Ident)?;
            let element_name = self.intern(&element);

            let element_node = self.asts.push_node_with(
                AST_BUILDER_NO_CHILDREN,
                source_of(&element),
                AstFlags::HAS_IDENT,
                AstTag::Identifier,
                0,
                &[element_name.to_raw()],
            );

            first.get_or_insert(element_node);

            if self.next_if(TokenTag::Comma).is_some() {
                let index = self.expect(CTX, TokenTag::Ident)?;
                let index_name = self.intern(&index);

                let _index_node = self.asts.push_node_with(
                    AST_BUILDER_NO_CHILDREN,
                    source_of(&index),
                    AstFlags::HAS_IDENT,
                    AstTag::Identifier,
                    0,
                    &[index_name.to_raw()],
                );

                flags |= AstFlags::HAS_INDEX;
            }

            self.expect(CTX, TokenTag::ArrowLeft)?;

            let _iterated = self.parse_simple_expr()?;
        } else if !matches!(
            self.peek_tag(0),
            Some(TokenTag::Do) | Some(TokenTag::CurlyBeg)
        ) {
            let condition = self.parse_simple_expr()?;

            flags |= AstFlags::HAS_CONDITION;
            first.get_or_insert(condition);
        }

        let _ = self.next_if(TokenTag::Do);

        let body = self.parse_top_level_expr(false)?;

        first.get_or_insert(body);

        if self.next_if(TokenTag::Finally).is_some() {
            let _finally = self.parse_top_level_expr(false)?;

            flags |= AstFlags::HAS_FINALLY;
        }

        Ok(self.asts.push_node(
            first.expect("for has at least a body"),
            source_of(&kw),
            flags,
            AstTag::For,
        ))
    }

    fn parse_switch(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Switch";

        let kw = self.expect(CTX, TokenTag::Switch)?;

        let mut flags = AstFlags::empty();
        let mut first: Option<AstBuilderToken> = None;

        if self.peek_initializer() {
            let init = self.parse_definition()?;

            self.expect(CTX, TokenTag::Semicolon)?;

            flags |= AstFlags::HAS_INIT;
            first = Some(init);
        }

        let switched = self.parse_simple_expr()?;

        first.get_or_insert(switched);

        if self.peek_tag(0) != Some(TokenTag::Case) {
            let got = self.peek(0).copied();

            return Err(match got {
                Some(t) => ParseError::UnexpectedToken {
                    context: CTX,
                    expected: TokenTag::Case,
                    got: t.tag,
                    line: t.line_number,
                    range: t.range,
                },
                None => ParseError::UnexpectedEndOfStream { context: CTX },
            });
        }

        while let Some(case_kw) = self.next_if(TokenTag::Case) {
            let mut case_first: Option<AstBuilderToken> = None;

            let label = self.parse_simple_expr()?;

            case_first.get_or_insert(label);

            while self.next_if(TokenTag::Comma).is_some() {
                let _label = self.parse_simple_expr()?;
            }

            self.expect(CTX, TokenTag::ArrowRight)?;

            let _body = self.parse_top_level_expr(false)?;

            let _case = self.asts.push_node(
                case_first.expect("case has at least one label"),
                source_of(&case_kw),
                AstFlags::empty(),
                AstTag::Case,
            );
        }

        Ok(self.asts.push_node(
            first.expect("switch has at least a switched expression"),
            source_of(&kw),
            flags,
            AstTag::Switch,
        ))
    }

    fn parse_block(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Block";

        let open = self.expect(CTX, TokenTag::CurlyBeg)?;

        let mut first: Option<AstBuilderToken> = None;

        loop {
            if self.next_if(TokenTag::CurlyEnd).is_some() {
                break;
            }

            if self.peek(0).is_none() {
                return Err(ParseError::UnexpectedEndOfStream { context: CTX });
            }

            let child = self.parse_top_level_expr(true)?;

            first.get_or_insert(child);
        }

        Ok(self.asts.push_node(
            first.unwrap_or(AST_BUILDER_NO_CHILDREN),
            source_of(&open),
            AstFlags::empty(),
            AstTag::Block,
        ))
    }

    fn parse_return(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Return";

        let kw = self.expect(CTX, TokenTag::Return)?;

        let mut flags = AstFlags::empty();
        let mut first = AST_BUILDER_NO_CHILDREN;

        if !matches!(self.peek_tag(0), None | Some(TokenTag::CurlyEnd)) {
            first = self.parse_top_level_expr(false)?;
            flags |= AstFlags::HAS_VALUE;
        }

        Ok(self
            .asts
            .push_node(first, source_of(&kw), flags, AstTag::Return))
    }

    fn parse_break(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Break";

        let kw = self.expect(CTX, TokenTag::Break)?;

        Ok(self.asts.push_node(
            AST_BUILDER_NO_CHILDREN,
            source_of(&kw),
            AstFlags::empty(),
            AstTag::Break,
        ))
    }

    fn parse_defer(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Defer";

        let kw = self.expect(CTX, TokenTag::Defer)?;

        let body = self.parse_top_level_expr(false)?;

        Ok(self
            .asts
            .push_node(body, source_of(&kw), AstFlags::empty(), AstTag::Defer))
    }

    fn parse_impl(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Impl";

        let kw = self.expect(CTX, TokenTag::Impl)?;

        let target = self.parse_simple_expr()?;
        let _body = self.parse_block()?;

        Ok(self
            .asts
            .push_node(target, source_of(&kw), AstFlags::empty(), AstTag::Impl))
    }

    // --- expressions --------------------------------------------------------

    fn pop_sy_op(
        &mut self,
        op_stk: &mut Vec<SyOp>,
        expr_stk: &mut Vec<AstBuilderToken>,
        at: &Token,
    ) -> ParseResult<()> {
        const CTX: &str = "Expr";

        let op = op_stk.pop().expect("caller checked the operator stack");

        match op.node {
            SyNode::Binary(kind) => {
                let _rhs = expr_stk
                    .pop()
                    .ok_or_else(|| self.invalid(CTX, "Operator is missing an operand", at))?;
                let lhs = expr_stk
                    .pop()
                    .ok_or_else(|| self.invalid(CTX, "Operator is missing an operand", at))?;

                expr_stk.push(self.asts.push_node_with(
                    lhs,
                    op.source,
                    AstFlags::empty(),
                    AstTag::BinaryOp,
                    kind as u8,
                    &[],
                ));
            }
            SyNode::Unary(kind) => {
                let operand = expr_stk
                    .pop()
                    .ok_or_else(|| self.invalid(CTX, "Operator is missing an operand", at))?;

                expr_stk.push(self.asts.push_node_with(
                    operand,
                    op.source,
                    AstFlags::empty(),
                    AstTag::UnaryOp,
                    kind as u8,
                    &[],
                ));
            }
            SyNode::TypePrefix {
                tag,
                flags,
                has_bound,
            } => {
                let element = expr_stk
                    .pop()
                    .ok_or_else(|| self.invalid(CTX, "Type constructor is missing its element type", at))?;

                let first = if has_bound {
                    expr_stk
                        .pop()
                        .ok_or_else(|| self.invalid(CTX, "Array type is missing its length", at))?
                } else {
                    element
                };

                expr_stk.push(self.asts.push_node(first, op.source, flags, tag));
            }
            SyNode::ParenSentinel => {
                return Err(self.invalid(CTX, "Unmatched ParenBeg", at));
            }
        }

        Ok(())
    }

    fn push_literal(&mut self, token: &Token) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Literal";

        let bytes = token.bytes(self.source).to_vec();
        let source = source_of(token);

        let node = match token.tag {
            TokenTag::LitInt => {
                let value = decode_integer(&bytes)
                    .map_err(|message| self.invalid(CTX, message, token))?;

                self.asts.push_node_with(
                    AST_BUILDER_NO_CHILDREN,
                    source,
                    AstFlags::empty(),
                    AstTag::LitInt,
                    0,
                    &[value as u32, (value >> 32) as u32],
                )
            }
            TokenTag::LitFloat => {
                let text = core::str::from_utf8(&bytes)
                    .map_err(|_| self.invalid(CTX, "Float literal is not valid UTF-8", token))?;
                let value: f64 = text
                    .parse()
                    .map_err(|_| self.invalid(CTX, "Not a valid float literal", token))?;
                let bits = value.to_bits();

                self.asts.push_node_with(
                    AST_BUILDER_NO_CHILDREN,
                    source,
                    AstFlags::empty(),
                    AstTag::LitFloat,
                    0,
                    &[bits as u32, (bits >> 32) as u32],
                )
            }
            TokenTag::LitChar => {
                let utf8 = decode_char(&bytes)
                    .map_err(|message| self.invalid(CTX, message, token))?;

                self.asts.push_node_with(
                    AST_BUILDER_NO_CHILDREN,
                    source,
                    AstFlags::empty(),
                    AstTag::LitChar,
                    0,
                    &[u32::from_le_bytes(utf8)],
                )
            }
            TokenTag::LitString => {
                let decoded = decode_string(&bytes)
                    .map_err(|message| self.invalid(CTX, message, token))?;

                let value = self.strings.index_from(&decoded);

                self.asts.push_node_with(
                    AST_BUILDER_NO_CHILDREN,
                    source,
                    AstFlags::empty(),
                    AstTag::LitString,
                    0,
                    &[value.to_raw()],
                )
            }
            _ => unreachable!("push_literal called on a non-literal token"),
        };

        Ok(node)
    }

    fn parse_simple_expr(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Expr";

        let first_token = self
            .peek(0)
            .copied()
            .ok_or(ParseError::UnexpectedEndOfStream { context: CTX })?;

        let mut expecting_operator = false;
        let mut expr_stk: Vec<AstBuilderToken> = Vec::new();
        let mut op_stk: Vec<SyOp> = Vec::new();
        let mut paren_nesting = 0usize;
        let mut last_paren = first_token;
        let mut last_token = first_token;

        loop {
            let Some(&t) = self.peek(0) else {
                if !expecting_operator {
                    return Err(ParseError::UnexpectedEndOfStream { context: CTX });
                }

                break;
            };

            last_token = t;

            match t.tag {
                TokenTag::Ident | TokenTag::Undefined => {
                    if expecting_operator {
                        break;
                    }

                    self.cursor += 1;

                    let name = self.intern(&t);

                    expr_stk.push(self.asts.push_node_with(
                        AST_BUILDER_NO_CHILDREN,
                        source_of(&t),
                        AstFlags::HAS_IDENT,
                        AstTag::Identifier,
                        0,
                        &[name.to_raw()],
                    ));

                    expecting_operator = true;
                }
                TokenTag::LitInt | TokenTag::LitFloat | TokenTag::LitChar | TokenTag::LitString => {
                    if expecting_operator {
                        break;
                    }

                    self.cursor += 1;

                    let node = self.push_literal(&t)?;

                    expr_stk.push(node);
                    expecting_operator = true;
                }
                TokenTag::LitBadNumber => {
                    if expecting_operator {
                        break;
                    }

                    return Err(self.invalid(CTX, "Malformed numeric literal", &t));
                }
                TokenTag::IncompleteComment => {
                    if expecting_operator {
                        break;
                    }

                    return Err(self.invalid(CTX, "Unterminated block comment", &t));
                }
                TokenTag::Proc | TokenTag::Func | TokenTag::Trait => {
                    if expecting_operator {
                        break;
                    }

                    let signature = self.parse_signature()?;

                    expr_stk.push(signature);
                    expecting_operator = true;
                }
                TokenTag::ParenBeg => {
                    self.cursor += 1;

                    if expecting_operator {
                        // Call. Member accesses bind tighter than the
                        // argument list, so fold them in first.
                        while op_stk.last().map_or(false, |op| op.prec <= 1) {
                            self.pop_sy_op(&mut op_stk, &mut expr_stk, &t)?;
                        }

                        let callee = expr_stk
                            .pop()
                            .ok_or_else(|| self.invalid(CTX, "Call is missing a callee", &t))?;

                        if self.next_if(TokenTag::ParenEnd).is_none() {
                            loop {
                                let _argument = self.parse_top_level_expr(false)?;

                                let t1 = self.next(CTX)?;

                                if t1.tag == TokenTag::ParenEnd {
                                    break;
                                } else if t1.tag != TokenTag::Comma {
                                    return Err(self.invalid(
                                        CTX,
                                        "Expected ParenEnd or Comma",
                                        &t1,
                                    ));
                                }
                            }
                        }

                        expr_stk.push(self.asts.push_node(
                            callee,
                            source_of(&t),
                            AstFlags::empty(),
                            AstTag::Call,
                        ));
                    } else {
                        last_paren = t;
                        paren_nesting += 1;

                        op_stk.push(SyOp {
                            prec: 255,
                            left_assoc: true,
                            node: SyNode::ParenSentinel,
                            source: source_of(&t),
                        });
                    }
                }
                TokenTag::ParenEnd => {
                    if !expecting_operator || paren_nesting == 0 {
                        break;
                    }

                    self.cursor += 1;
                    paren_nesting -= 1;

                    while op_stk.last().map_or(false, |op| op.prec != 255) {
                        self.pop_sy_op(&mut op_stk, &mut expr_stk, &t)?;
                    }

                    let _sentinel = op_stk.pop();
                }
                TokenTag::BracketBeg => {
                    if expecting_operator {
                        // Index.
                        self.cursor += 1;

                        while op_stk.last().map_or(false, |op| op.prec <= 1) {
                            self.pop_sy_op(&mut op_stk, &mut expr_stk, &t)?;
                        }

                        let lhs = expr_stk.pop().ok_or_else(|| {
                            self.invalid(CTX, "Index is missing an indexed expression", &t)
                        })?;

                        let _index = self.parse_top_level_expr(false)?;

                        self.expect(CTX, TokenTag::BracketEnd)?;

                        expr_stk.push(self.asts.push_node_with(
                            lhs,
                            source_of(&t),
                            AstFlags::empty(),
                            AstTag::BinaryOp,
                            BinaryOpKind::Index as u8,
                            &[],
                        ));
                    } else {
                        // Type constructor: `[]T`, `[*]T` or `[len]T`.
                        self.cursor += 1;

                        if self.next_if(TokenTag::BracketEnd).is_some() {
                            let flags = self.slice_mutability();

                            op_stk.push(SyOp {
                                prec: 2,
                                left_assoc: false,
                                node: SyNode::TypePrefix {
                                    tag: AstTag::SliceType,
                                    flags,
                                    has_bound: false,
                                },
                                source: source_of(&t),
                            });
                        } else if self.peek_tag(0) == Some(TokenTag::OpMulOrPtr)
                            && self.peek_tag(1) == Some(TokenTag::BracketEnd)
                        {
                            self.cursor += 2;

                            let flags = self.slice_mutability() | AstFlags::IS_MULTI;

                            op_stk.push(SyOp {
                                prec: 2,
                                left_assoc: false,
                                node: SyNode::TypePrefix {
                                    tag: AstTag::MultiPtrType,
                                    flags,
                                    has_bound: false,
                                },
                                source: source_of(&t),
                            });
                        } else {
                            let bound = self.parse_top_level_expr(false)?;

                            self.expect(CTX, TokenTag::BracketEnd)?;

                            expr_stk.push(bound);

                            op_stk.push(SyOp {
                                prec: 2,
                                left_assoc: false,
                                node: SyNode::TypePrefix {
                                    tag: AstTag::ArrayType,
                                    flags: AstFlags::empty(),
                                    has_bound: true,
                                },
                                source: source_of(&t),
                            });
                        }
                    }
                }
                TokenTag::OpMulOrPtr if !expecting_operator => {
                    // Pointer type.
                    self.cursor += 1;

                    let flags = self.slice_mutability();

                    op_stk.push(SyOp {
                        prec: 2,
                        left_assoc: false,
                        node: SyNode::TypePrefix {
                            tag: AstTag::PtrType,
                            flags,
                            has_bound: false,
                        },
                        source: source_of(&t),
                    });
                }
                TokenTag::OpBitAndOrRef
                    if !expecting_operator && self.peek_tag(1) == Some(TokenTag::Mut) =>
                {
                    // `&mut T` reference type; a bare `&` stays address-of.
                    self.cursor += 2;

                    op_stk.push(SyOp {
                        prec: 2,
                        left_assoc: false,
                        node: SyNode::TypePrefix {
                            tag: AstTag::RefType,
                            flags: AstFlags::IS_MUT,
                            has_bound: false,
                        },
                        source: source_of(&t),
                    });
                }
                TokenTag::TripleDot if !expecting_operator => {
                    self.cursor += 1;

                    op_stk.push(SyOp {
                        prec: 2,
                        left_assoc: false,
                        node: SyNode::TypePrefix {
                            tag: AstTag::VariadicType,
                            flags: AstFlags::empty(),
                            has_bound: false,
                        },
                        source: source_of(&t),
                    });
                }
                _ => {
                    let op = if expecting_operator {
                        binary_sy_op(t.tag, source_of(&t))
                    } else {
                        unary_sy_op(t.tag, source_of(&t))
                    };

                    let Some(op) = op else {
                        if expecting_operator {
                            break;
                        }

                        return Err(self.invalid(
                            CTX,
                            "Expected Ident, Literal, unary operator, ParenBeg or BracketBeg",
                            &t,
                        ));
                    };

                    self.cursor += 1;

                    while let Some(&prev) = op_stk.last() {
                        if prev.prec >= op.prec && !(prev.prec == op.prec && op.left_assoc) {
                            break;
                        }

                        self.pop_sy_op(&mut op_stk, &mut expr_stk, &t)?;
                    }

                    op_stk.push(op);
                    expecting_operator = false;
                }
            }
        }

        if paren_nesting != 0 {
            return Err(self.invalid(CTX, "Unmatched ParenBeg", &last_paren));
        }

        while !op_stk.is_empty() {
            self.pop_sy_op(&mut op_stk, &mut expr_stk, &last_token)?;
        }

        if expr_stk.len() != 1 {
            return Err(self.invalid(CTX, "Too many subexpressions", &first_token));
        }

        Ok(expr_stk[0])
    }

    /// Optional `mut` after a reference-type opener.
    fn slice_mutability(&mut self) -> AstFlags {
        if self.next_if(TokenTag::Mut).is_some() {
            AstFlags::IS_MUT
        } else {
            AstFlags::empty()
        }
    }

    fn parse_signature(&mut self) -> ParseResult<AstBuilderToken> {
        const CTX: &str = "Signature";

        let kw = self.next(CTX)?;

        let tag = match kw.tag {
            TokenTag::Proc => AstTag::ProcSignature,
            TokenTag::Func => AstTag::FuncSignature,
            TokenTag::Trait => AstTag::TraitSignature,
            _ => unreachable!("parse_signature called on a non-signature keyword"),
        };

        self.expect(CTX, TokenTag::ParenBeg)?;

        let mut flags = AstFlags::empty();
        let mut first: Option<AstBuilderToken> = None;

        if self.next_if(TokenTag::ParenEnd).is_none() {
            loop {
                let mut parameter_flags = AstFlags::HAS_IDENT;

                if self.next_if(TokenTag::Mut).is_some() {
                    parameter_flags |= AstFlags::IS_MUT;
                }

                let ident = self.expect(CTX, TokenTag::Ident)?;
                let name = self.intern(&ident);

                let mut parameter_first: Option<AstBuilderToken> = None;

                if self.next_if(TokenTag::Colon).is_some() {
                    let ty = self.parse_simple_expr()?;

                    parameter_flags |= AstFlags::HAS_TYPE;
                    parameter_first = Some(ty);
                }

                if self.next_if(TokenTag::Set).is_some() {
                    let default = self.parse_top_level_expr(false)?;

                    parameter_flags |= AstFlags::HAS_VALUE;
                    parameter_first.get_or_insert(default);
                }

                let parameter = self.asts.push_node_with(
                    parameter_first.unwrap_or(AST_BUILDER_NO_CHILDREN),
                    source_of(&ident),
                    parameter_flags,
                    AstTag::Definition,
                    0,
                    &[name.to_raw()],
                );

                first.get_or_insert(parameter);

                let t1 = self.next(CTX)?;

                if t1.tag == TokenTag::ParenEnd {
                    break;
                } else if t1.tag != TokenTag::Comma {
                    return Err(self.invalid(CTX, "Expected ParenEnd or Comma", &t1));
                }
            }
        }

        if self.next_if(TokenTag::ArrowRight).is_some() {
            let ret = self.parse_simple_expr()?;

            flags |= AstFlags::HAS_RETURN_TYPE;
            first.get_or_insert(ret);
        }

        if self.peek_tag(0) == Some(TokenTag::CurlyBeg) {
            let body = self.parse_block()?;

            flags |= AstFlags::HAS_BODY;
            first.get_or_insert(body);
        }

        Ok(self.asts.push_node(
            first.unwrap_or(AST_BUILDER_NO_CHILDREN),
            source_of(&kw),
            flags,
            tag,
        ))
    }
}

// --- literal decoding -------------------------------------------------------

fn accumulate(value: u64, base: u64, digit: u64) -> u64 {
    // Overflow beyond 64 bits wraps; the decoded value is reduced mod 2^64.
    value.wrapping_mul(base).wrapping_add(digit)
}

fn decode_integer(bytes: &[u8]) -> Result<u64, &'static str> {
    let mut value = 0u64;

    if bytes.len() >= 3 && bytes[0] == b'0' {
        match bytes[1] {
            b'x' | b'X' => {
                for &c in &bytes[2..] {
                    let digit = (c as char)
                        .to_digit(16)
                        .ok_or("Not a valid hexadecimal string")?;

                    value = accumulate(value, 16, u64::from(digit));
                }

                return Ok(value);
            }
            b'o' | b'O' => {
                for &c in &bytes[2..] {
                    let digit = (c as char).to_digit(8).ok_or("Not a valid octal string")?;

                    value = accumulate(value, 8, u64::from(digit));
                }

                return Ok(value);
            }
            b'b' | b'B' => {
                for &c in &bytes[2..] {
                    let digit = (c as char).to_digit(2).ok_or("Not a valid binary string")?;

                    value = accumulate(value, 2, u64::from(digit));
                }

                return Ok(value);
            }
            _ => {}
        }
    }

    if bytes.len() >= 2 && matches!(bytes[1], b'x' | b'X' | b'o' | b'O' | b'b' | b'B') {
        return Err("Cannot have empty integer literal");
    }

    for &c in bytes {
        let digit = (c as char).to_digit(10).ok_or("Not a valid decimal string")?;

        value = accumulate(value, 10, u64::from(digit));
    }

    Ok(value)
}

fn encode_codepoint(codepoint: u32) -> Result<[u8; 4], &'static str> {
    let mut out = [0u8; 4];

    if codepoint <= 0x7f {
        out[0] = codepoint as u8;
    } else if codepoint <= 0x7ff {
        out[0] = 0xc0 | (codepoint >> 6) as u8;
        out[1] = 0x80 | (codepoint & 0x3f) as u8;
    } else if codepoint <= 0xffff {
        out[0] = 0xe0 | (codepoint >> 12) as u8;
        out[1] = 0x80 | ((codepoint >> 6) & 0x3f) as u8;
        out[2] = 0x80 | (codepoint & 0x3f) as u8;
    } else if codepoint <= 0x10_ffff {
        out[0] = 0xf0 | (codepoint >> 18) as u8;
        out[1] = 0x80 | ((codepoint >> 12) & 0x3f) as u8;
        out[2] = 0x80 | ((codepoint >> 6) & 0x3f) as u8;
        out[3] = 0x80 | (codepoint & 0x3f) as u8;
    } else {
        return Err("Escape sequence exceeds the maximal unicode code point (0x10FFFF)");
    }

    Ok(out)
}

fn decode_char(bytes: &[u8]) -> Result<[u8; 4], &'static str> {
    if bytes.is_empty() {
        return Err("Empty character literal");
    }

    let cp0 = bytes[0];

    if cp0 == b'\\' {
        if bytes.len() == 1 {
            return Err("Empty escape sequence");
        }

        let escapee = bytes[1];

        if escapee == b'x' {
            if bytes.len() <= 2 {
                return Err("Empty hexadecimal character escape sequence");
            }

            let mut codepoint = 0u32;

            for &c in &bytes[2..] {
                let digit = (c as char)
                    .to_digit(16)
                    .ok_or("Non-hexadecimal character in hexadecimal character escape sequence")?;

                codepoint = codepoint.wrapping_mul(16).wrapping_add(digit);
            }

            return encode_codepoint(codepoint);
        }

        if escapee.is_ascii_digit() {
            let mut codepoint = 0u32;

            for &c in &bytes[1..] {
                let digit = (c as char)
                    .to_digit(10)
                    .ok_or("Non-decimal character in decimal character escape sequence")?;

                codepoint = codepoint.wrapping_mul(10).wrapping_add(digit);
            }

            return encode_codepoint(codepoint);
        }

        let value = match escapee {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0b,
            b'\\' => b'\\',
            b'\'' => b'\'',
            _ => return Err("Unknown character escape sequence"),
        };

        return Ok([value, 0, 0, 0]);
    }

    let expected_len = match cp0 {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        _ => return Err("Unexpected code unit"),
    };

    if bytes.len() != expected_len {
        return Err("Invalid length for code point");
    }

    let mut out = [0u8; 4];

    out[0] = cp0;

    for (i, &c) in bytes.iter().enumerate().skip(1) {
        if c & 0xc0 != 0x80 {
            return Err("Invalid continuation code unit");
        }

        out[i] = c;
    }

    Ok(out)
}

fn decode_string(bytes: &[u8]) -> Result<Vec<u8>, &'static str> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter();

    while let Some(&c) = iter.next() {
        if c != b'\\' {
            out.push(c);
            continue;
        }

        let &escapee = iter.next().ok_or("Empty character escape sequence")?;

        let value = match escapee {
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'n' => b'\n',
            b'r' => b'\r',
            b't' => b'\t',
            b'v' => 0x0b,
            b'\\' => b'\\',
            b'"' => b'"',
            _ => return Err("Invalid character escape sequence"),
        };

        out.push(value);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::{decode_char, decode_integer, decode_string};

    #[test]
    fn integers_decode_in_every_base() {
        assert_eq!(decode_integer(b"42"), Ok(42));
        assert_eq!(decode_integer(b"0x2a"), Ok(42));
        assert_eq!(decode_integer(b"0o52"), Ok(42));
        assert_eq!(decode_integer(b"0b101010"), Ok(42));
        assert_eq!(decode_integer(b"0"), Ok(0));
    }

    #[test]
    fn empty_base_prefix_is_rejected() {
        assert!(decode_integer(b"0x").is_err());
        assert!(decode_integer(b"0b").is_err());
    }

    #[test]
    fn oversized_integer_wraps() {
        // 2^64 == 0 under the documented wrapping rule.
        assert_eq!(decode_integer(b"18446744073709551616"), Ok(0));
        assert_eq!(decode_integer(b"18446744073709551617"), Ok(1));
    }

    #[test]
    fn char_escapes_decode() {
        assert_eq!(decode_char(b"a"), Ok([b'a', 0, 0, 0]));
        assert_eq!(decode_char(b"\\n"), Ok([b'\n', 0, 0, 0]));
        assert_eq!(decode_char(b"\\x41"), Ok([0x41, 0, 0, 0]));
        assert_eq!(decode_char(b"\\955"), Ok([0xce, 0xbb, 0, 0])); // U+03BB
        assert!(decode_char(b"\\q").is_err());
        assert!(decode_char(b"ab").is_err());
    }

    #[test]
    fn utf8_chars_pass_through() {
        assert_eq!(decode_char("λ".as_bytes()), Ok([0xce, 0xbb, 0, 0]));
        assert_eq!(decode_char("🦀".as_bytes()), Ok([0xf0, 0x9f, 0xa6, 0x80]));
    }

    #[test]
    fn string_escapes_decode() {
        assert_eq!(decode_string(b"hello\\n"), Ok(b"hello\n".to_vec()));
        assert_eq!(decode_string(b"a\\\\b"), Ok(b"a\\b".to_vec()));
        assert_eq!(decode_string(b"say \\\"hi\\\""), Ok(b"say \"hi\"".to_vec()));
        assert!(decode_string(b"bad\\q").is_err());
    }
}
