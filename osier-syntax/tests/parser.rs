//! End-to-end parser tests: source text in, flattened AST out.

use osier_pool::{IdentifierId, IdentifierPool};
use osier_syntax::{
    parse, tokenize, AstDirectChildIterator, AstFlags, AstNode, AstNodeId, AstPool, AstTag,
    BinaryOpKind, ParseError, UnaryOpKind,
};

#[derive(Debug)]
struct Parsed {
    asts: AstPool,
    root: AstNodeId,
    identifiers: IdentifierPool,
    strings: IdentifierPool,
}

fn parse_source(source: &str) -> Result<Parsed, ParseError> {
    let tokens = tokenize(source.as_bytes(), false);

    let mut identifiers = IdentifierPool::new();
    let mut strings = IdentifierPool::new();
    let mut asts = AstPool::new();

    let root = parse(
        &tokens,
        source.as_bytes(),
        &mut identifiers,
        &mut strings,
        &mut asts,
    )?;

    Ok(Parsed {
        asts,
        root,
        identifiers,
        strings,
    })
}

fn children<'a>(_p: &'a Parsed, node: AstNode<'a>) -> Vec<AstNode<'a>> {
    AstDirectChildIterator::new(node).collect()
}

fn ident_name<'a>(p: &'a Parsed, node: &AstNode<'_>) -> &'a [u8] {
    p.identifiers
        .entry_from_id(IdentifierId::from_raw(node.ident_payload()))
        .bytes()
}

#[test]
fn empty_file_parses_to_childless_root() {
    let p = parse_source("").expect("empty file parses");
    let root = p.asts.node(p.root);

    assert_eq!(root.tag(), AstTag::File);
    assert!(!root.has_children());
}

#[test]
fn comptime_definition_of_integer() {
    let p = parse_source("x :: 42").expect("definition parses");
    let root = p.asts.node(p.root);

    let top = children(&p, root);

    assert_eq!(top.len(), 1);
    assert_eq!(top[0].tag(), AstTag::Definition);
    assert!(top[0].flags().contains(AstFlags::IS_COMPTIME));
    assert_eq!(ident_name(&p, &top[0]), b"x");

    let value = children(&p, top[0]);

    assert_eq!(value.len(), 1);
    assert_eq!(value[0].tag(), AstTag::LitInt);
    assert_eq!(value[0].int_payload(), 42);
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let p = parse_source("a + b * c").expect("expression parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top.len(), 1);
    assert_eq!(top[0].tag(), AstTag::BinaryOp);
    assert_eq!(top[0].op_kind(), BinaryOpKind::Add as u8);

    let add_operands = children(&p, top[0]);

    assert_eq!(add_operands.len(), 2);
    assert_eq!(add_operands[0].tag(), AstTag::Identifier);
    assert_eq!(ident_name(&p, &add_operands[0]), b"a");
    assert_eq!(add_operands[1].op_kind(), BinaryOpKind::Mul as u8);

    let mul_operands = children(&p, add_operands[1]);

    assert_eq!(ident_name(&p, &mul_operands[0]), b"b");
    assert_eq!(ident_name(&p, &mul_operands[1]), b"c");
}

#[test]
fn addition_is_left_associative() {
    let p = parse_source("a + b + c").expect("expression parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].op_kind(), BinaryOpKind::Add as u8);

    let outer = children(&p, top[0]);

    assert_eq!(outer[0].op_kind(), BinaryOpKind::Add as u8);
    assert_eq!(ident_name(&p, &outer[1]), b"c");

    let inner = children(&p, outer[0]);

    assert_eq!(ident_name(&p, &inner[0]), b"a");
    assert_eq!(ident_name(&p, &inner[1]), b"b");
}

#[test]
fn if_then_else_collects_three_children() {
    let p = parse_source("if x then y else z").expect("if parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top.len(), 1);
    assert_eq!(top[0].tag(), AstTag::If);
    assert!(top[0].flags().contains(AstFlags::HAS_ELSE));
    assert!(!top[0].flags().contains(AstFlags::HAS_INIT));

    let parts = children(&p, top[0]);

    assert_eq!(parts.len(), 3);
    assert_eq!(ident_name(&p, &parts[0]), b"x");
    assert_eq!(ident_name(&p, &parts[1]), b"y");
    assert_eq!(ident_name(&p, &parts[2]), b"z");
}

#[test]
fn string_literals_intern_decoded_values_by_identity() {
    let p = parse_source("a :: \"hello\\n\"\nb :: \"hello\\n\"\nc :: \"other\"")
        .expect("strings parse");

    let top = children(&p, p.asts.node(p.root));

    let value_of = |def: &AstNode<'_>| children(&p, *def)[0].string_payload();

    let a = value_of(&top[0]);
    let b = value_of(&top[1]);
    let c = value_of(&top[2]);

    assert_eq!(a, b, "equal decoded contents share a value id");
    assert_ne!(a, c);

    let decoded = p.strings.entry_from_id(IdentifierId::from_raw(a));

    assert_eq!(decoded.bytes(), b"hello\n");
}

#[test]
fn unterminated_block_comment_is_invalid_syntax() {
    let err = parse_source("x :: 1\n/* nope").expect_err("must fail");

    assert!(
        matches!(
            err,
            ParseError::InvalidSyntax {
                message: "Unterminated block comment",
                line: 2,
                ..
            }
        ),
        "got {err:?}"
    );
}

#[test]
fn unary_operators_nest_inside_binary_operators() {
    let p = parse_source("-a + ~b").expect("expression parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].op_kind(), BinaryOpKind::Add as u8);

    let operands = children(&p, top[0]);

    assert_eq!(operands[0].tag(), AstTag::UnaryOp);
    assert_eq!(operands[0].op_kind(), UnaryOpKind::Neg as u8);
    assert_eq!(operands[1].tag(), AstTag::UnaryOp);
    assert_eq!(operands[1].op_kind(), UnaryOpKind::BitNot as u8);
}

#[test]
fn try_binds_looser_than_every_binary_operator() {
    let p = parse_source("try a + b").expect("expression parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].tag(), AstTag::UnaryOp);
    assert_eq!(top[0].op_kind(), UnaryOpKind::Try as u8);

    let operand = children(&p, top[0]);

    assert_eq!(operand[0].op_kind(), BinaryOpKind::Add as u8);
}

#[test]
fn parenthesized_grouping_overrides_precedence() {
    let p = parse_source("(a + b) * c").expect("expression parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].op_kind(), BinaryOpKind::Mul as u8);

    let operands = children(&p, top[0]);

    assert_eq!(operands[0].op_kind(), BinaryOpKind::Add as u8);
    assert_eq!(ident_name(&p, &operands[1]), b"c");
}

#[test]
fn call_folds_member_access_first() {
    let p = parse_source("a.b(c, d)").expect("call parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].tag(), AstTag::Call);

    let parts = children(&p, top[0]);

    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].op_kind(), BinaryOpKind::Member as u8);
    assert_eq!(ident_name(&p, &parts[1]), b"c");
    assert_eq!(ident_name(&p, &parts[2]), b"d");
}

#[test]
fn index_parses_as_binary_operator() {
    let p = parse_source("xs[i + 1]").expect("index parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].tag(), AstTag::BinaryOp);
    assert_eq!(top[0].op_kind(), BinaryOpKind::Index as u8);

    let parts = children(&p, top[0]);

    assert_eq!(ident_name(&p, &parts[0]), b"xs");
    assert_eq!(parts[1].op_kind(), BinaryOpKind::Add as u8);
}

#[test]
fn assignment_folds_once_as_outermost_operator() {
    let p = parse_source("a = b + c").expect("assignment parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top.len(), 1);
    assert_eq!(top[0].op_kind(), BinaryOpKind::Set as u8);

    let operands = children(&p, top[0]);

    assert_eq!(ident_name(&p, &operands[0]), b"a");
    assert_eq!(operands[1].op_kind(), BinaryOpKind::Add as u8);
}

#[test]
fn compound_assignment_and_catch_fold_like_assignment() {
    let p = parse_source("a <<= b\nx catch y").expect("folds parse");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top.len(), 2);
    assert_eq!(top[0].op_kind(), BinaryOpKind::SetShiftL as u8);
    assert_eq!(top[1].op_kind(), BinaryOpKind::Catch as u8);
}

#[test]
fn typed_definition_records_type_and_value() {
    let p = parse_source("count : u32 = 3").expect("definition parses");

    let top = children(&p, p.asts.node(p.root));

    let flags = top[0].flags();

    assert!(flags.contains(AstFlags::HAS_TYPE));
    assert!(flags.contains(AstFlags::HAS_VALUE));
    assert!(!flags.contains(AstFlags::IS_COMPTIME));

    let parts = children(&p, top[0]);

    assert_eq!(parts.len(), 2);
    assert_eq!(ident_name(&p, &parts[0]), b"u32");
    assert_eq!(parts[1].int_payload(), 3);
}

#[test]
fn definition_requires_type_or_value() {
    let err = parse_source("x :").expect_err("must fail");

    assert!(matches!(err, ParseError::UnexpectedEndOfStream { .. }), "got {err:?}");
}

#[test]
fn pointer_and_slice_types_parse_in_operand_position() {
    let p = parse_source("p : *mut u8 = addr\ns : []u32\na : [4]f64\nm : [*]u8")
        .expect("type expressions parse");

    let top = children(&p, p.asts.node(p.root));

    let ptr = children(&p, top[0])[0];

    assert_eq!(ptr.tag(), AstTag::PtrType);
    assert!(ptr.flags().contains(AstFlags::IS_MUT));

    let slice = children(&p, top[1])[0];

    assert_eq!(slice.tag(), AstTag::SliceType);

    let array = children(&p, top[2])[0];

    assert_eq!(array.tag(), AstTag::ArrayType);

    let array_parts = children(&p, array);

    assert_eq!(array_parts.len(), 2);
    assert_eq!(array_parts[0].int_payload(), 4);
    assert_eq!(ident_name(&p, &array_parts[1]), b"f64");

    let multi = children(&p, top[3])[0];

    assert_eq!(multi.tag(), AstTag::MultiPtrType);
    assert!(multi.flags().contains(AstFlags::IS_MULTI));
}

#[test]
fn proc_signature_with_body_parses() {
    let p = parse_source("add :: proc(a: u32, b: u32) -> u32 { return a + b }")
        .expect("proc parses");

    let top = children(&p, p.asts.node(p.root));

    let signature = children(&p, top[0])[0];

    assert_eq!(signature.tag(), AstTag::ProcSignature);
    assert!(signature.flags().contains(AstFlags::HAS_RETURN_TYPE));
    assert!(signature.flags().contains(AstFlags::HAS_BODY));

    let parts = children(&p, signature);

    // Two parameters, the return type, the body block.
    assert_eq!(parts.len(), 4);
    assert_eq!(parts[0].tag(), AstTag::Definition);
    assert_eq!(parts[1].tag(), AstTag::Definition);
    assert_eq!(ident_name(&p, &parts[2]), b"u32");
    assert_eq!(parts[3].tag(), AstTag::Block);

    let body = children(&p, parts[3]);

    assert_eq!(body[0].tag(), AstTag::Return);
}

#[test]
fn for_loop_variants_parse() {
    let p = parse_source("for x < 10 do tick()\nfor i <- items { use(i) } finally done()")
        .expect("for loops parse");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].tag(), AstTag::For);
    assert!(top[0].flags().contains(AstFlags::HAS_CONDITION));

    assert_eq!(top[1].tag(), AstTag::For);
    assert!(top[1].flags().contains(AstFlags::IS_FOR_EACH));
    assert!(top[1].flags().contains(AstFlags::HAS_FINALLY));

    let parts = children(&p, top[1]);

    // element ident, iterated expr, body, finally
    assert_eq!(parts.len(), 4);
    assert_eq!(ident_name(&p, &parts[0]), b"i");
}

#[test]
fn switch_parses_case_clauses() {
    let p = parse_source("switch x case 1, 2 -> a case 3 -> b").expect("switch parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].tag(), AstTag::Switch);

    let parts = children(&p, top[0]);

    assert_eq!(parts.len(), 3);
    assert_eq!(ident_name(&p, &parts[0]), b"x");
    assert_eq!(parts[1].tag(), AstTag::Case);
    assert_eq!(parts[2].tag(), AstTag::Case);

    let first_case = children(&p, parts[1]);

    // labels 1 and 2, then the body
    assert_eq!(first_case.len(), 3);
    assert_eq!(first_case[0].int_payload(), 1);
    assert_eq!(first_case[1].int_payload(), 2);
}

#[test]
fn switch_without_cases_is_an_error() {
    let err = parse_source("switch x").expect_err("must fail");

    assert!(
        matches!(
            err,
            ParseError::UnexpectedEndOfStream { .. } | ParseError::UnexpectedToken { .. }
        ),
        "got {err:?}"
    );
}

#[test]
fn invalid_character_reports_invalid_syntax() {
    let err = parse_source("a + `").expect_err("must fail");

    assert!(matches!(err, ParseError::InvalidSyntax { .. }), "got {err:?}");
}

#[test]
fn stray_closing_paren_is_rejected() {
    let err = parse_source(")").expect_err("must fail");

    assert!(matches!(err, ParseError::InvalidSyntax { .. }), "got {err:?}");
}

#[test]
fn unmatched_open_paren_is_rejected() {
    let err = parse_source("(a + b").expect_err("must fail");

    assert!(
        matches!(
            err,
            ParseError::InvalidSyntax { .. } | ParseError::UnexpectedEndOfStream { .. }
        ),
        "got {err:?}"
    );
}

#[test]
fn defer_and_break_and_blocks_parse() {
    let p = parse_source("{ defer release(h)\nbreak }").expect("block parses");

    let top = children(&p, p.asts.node(p.root));

    assert_eq!(top[0].tag(), AstTag::Block);

    let body = children(&p, top[0]);

    assert_eq!(body.len(), 2);
    assert_eq!(body[0].tag(), AstTag::Defer);
    assert_eq!(body[1].tag(), AstTag::Break);
    assert!(!body[1].has_children());
}

#[test]
fn if_with_initializer_parses() {
    let p = parse_source("if v :: lookup(); v != sentinel then use(v)").expect("if parses");

    let top = children(&p, p.asts.node(p.root));

    assert!(top[0].flags().contains(AstFlags::HAS_INIT));

    let parts = children(&p, top[0]);

    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0].tag(), AstTag::Definition);
    assert_eq!(parts[1].op_kind(), BinaryOpKind::CmpNe as u8);
    assert_eq!(parts[2].tag(), AstTag::Call);
}
