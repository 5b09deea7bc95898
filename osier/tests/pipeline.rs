//! End-to-end pipeline tests: source text through lexer, parser and lowering
//! to a decodable opcode stream.

use std::path::PathBuf;

use osier::{compile_file, create_core_data, CoreData};
use osier_asm::{Instr, Op, OpTag, OpcodeId};
use osier_pool::IdentifierId;

fn compile(source: &str) -> (CoreData, Option<OpcodeId>) {
    let mut core = create_core_data(None).expect("core builds");

    let file = core
        .sources
        .add_bytes(PathBuf::from("test.osi"), source.as_bytes().to_vec());

    let entry = compile_file(&mut core, file);

    (core, entry)
}

fn stream_ops(core: &CoreData, start: OpcodeId) -> Vec<Instr> {
    core.opcodes
        .reader_at(start)
        .map(|r| r.expect("stream decodes").1)
        .collect()
}

#[test]
fn empty_file_compiles_to_a_bare_end_code() {
    let (core, entry) = compile("");

    let entry = entry.expect("compiles");
    let ops = stream_ops(&core, entry);

    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].op.tag(), OpTag::EndCode);
    assert!(!core.errors.has_errors());
}

#[test]
fn comptime_integer_definition_lowers_to_global_alloc() {
    let (core, entry) = compile("x :: 42");

    let entry = entry.expect("compiles");
    let ops = stream_ops(&core, entry);

    assert_eq!(ops.len(), 3);
    assert!(
        matches!(&ops[0].op, Op::ValueInteger { value } if value.to_u64() == 42),
        "got {:?}",
        ops[0].op
    );
    assert!(matches!(
        &ops[1].op,
        Op::FileGlobalAllocUntyped { rank: 0, .. }
    ));
    assert_eq!(ops[2].op.tag(), OpTag::EndCode);
}

#[test]
fn arithmetic_lowers_in_operand_order() {
    let (core, entry) = compile("r :: a + b * c");

    let entry = entry.expect("compiles");
    let ops = stream_ops(&core, entry);

    let tags: Vec<OpTag> = ops.iter().map(|i| i.op.tag()).collect();

    // a, b, c, mul, add, alloc, end
    assert_eq!(
        tags,
        vec![
            OpTag::LoadGlobal,
            OpTag::LoadGlobal,
            OpTag::LoadGlobal,
            OpTag::BinaryArithmeticOp,
            OpTag::BinaryArithmeticOp,
            OpTag::FileGlobalAllocUntyped,
            OpTag::EndCode,
        ]
    );
}

#[test]
fn if_else_emits_two_branch_streams() {
    let (core, entry) = compile("r :: if x then y else z");

    let entry = entry.expect("compiles");
    let ops = stream_ops(&core, entry);

    let if_else = ops
        .iter()
        .find_map(|i| match &i.op {
            Op::IfElse {
                consequent,
                alternative,
            } => Some((*consequent, *alternative)),
            _ => None,
        })
        .expect("IfElse emitted");

    // Both branch streams decode and end correctly.
    let consequent = stream_ops(&core, if_else.0);
    let alternative = stream_ops(&core, if_else.1);

    assert_eq!(consequent.last().expect("nonempty").op.tag(), OpTag::EndCode);
    assert_eq!(alternative.last().expect("nonempty").op.tag(), OpTag::EndCode);
    assert_eq!(consequent[0].op.tag(), OpTag::LoadGlobal);
}

#[test]
fn assignment_marks_the_storing_instruction() {
    let (core, entry) = compile("p :: proc(a: u32) { a = a + 1 }");

    let entry = entry.expect("compiles");

    // Find the body stream via the BindBody reference.
    let mut body = None;

    for item in core.opcodes.reader_at(entry) {
        let (_, instr) = item.expect("decodes");

        if let Op::BindBody { body: b } = instr.op {
            body = Some(b);
        }
    }

    // The signature has no body at the entry level... walk every stream we
    // can reach instead: the assignment's final arithmetic op must carry the
    // write-context bit.
    let body = body.expect("proc body bound");

    let mut cursor = Some(body);
    let mut found_marked = false;

    while let Some(id) = cursor {
        let (instr, next) = core.opcodes.read_at(id).expect("decodes");

        if instr.op.tag() == OpTag::BinaryArithmeticOp {
            assert!(instr.consumes_write_ctx);
            found_marked = true;
        }

        if instr.op.tag() == OpTag::SetWriteCtx {
            assert!(!instr.consumes_write_ctx);
        }

        cursor = next;
    }

    assert!(found_marked, "assignment arithmetic not found in body stream");
}

#[test]
fn string_literals_share_a_forever_value() {
    let (core, entry) = compile("a :: \"dup\"\nb :: \"dup\"");

    let entry = entry.expect("compiles");
    let ops = stream_ops(&core, entry);

    let values: Vec<u32> = ops
        .iter()
        .filter_map(|i| match &i.op {
            Op::ValueString { value } => Some(value.to_raw()),
            _ => None,
        })
        .collect();

    assert_eq!(values.len(), 2);
    assert_eq!(values[0], values[1]);

    let decoded = core
        .strings
        .entry_from_id(IdentifierId::from_raw(values[0]));

    assert_eq!(decoded.bytes(), b"dup");
}

#[test]
fn calls_prepare_argument_streams() {
    let (core, entry) = compile("r :: f(1, g(2))");

    let entry = entry.expect("compiles");
    let ops = stream_ops(&core, entry);

    let arguments = ops
        .iter()
        .find_map(|i| match &i.op {
            Op::PrepareArgs { arguments } => Some(arguments.clone()),
            _ => None,
        })
        .expect("PrepareArgs emitted");

    assert_eq!(arguments.len(), 2);

    // Argument callbacks are valid streams emitted before the call.
    for (name, callback) in arguments {
        assert!(name.is_invalid(), "positional arguments carry no name");
        assert!(callback.to_raw() < entry.to_raw());

        let ops = stream_ops(&core, callback);

        assert_eq!(ops.last().expect("nonempty").op.tag(), OpTag::EndCode);
    }
}

#[test]
fn loops_reference_condition_and_body_streams() {
    let (core, entry) = compile("go :: proc() { for x < 3 do tick() finally done() }");

    let entry = entry.expect("compiles");

    let mut streams = vec![entry];
    let mut loop_found = false;

    while let Some(start) = streams.pop() {
        for item in core.opcodes.reader_at(start) {
            let (_, instr) = item.expect("decodes");

            match instr.op {
                Op::BindBody { body } => streams.push(body),
                Op::LoopFinally {
                    condition,
                    body,
                    finally,
                } => {
                    loop_found = true;

                    for sub in [condition, body, finally] {
                        let ops = stream_ops(&core, sub);

                        assert_eq!(ops.last().expect("nonempty").op.tag(), OpTag::EndCode);
                    }
                }
                _ => {}
            }
        }
    }

    assert!(loop_found, "LoopFinally not found");
}

#[test]
fn scope_blocks_balance_begin_and_end() {
    let (core, entry) = compile("r :: { a : = 1\nb : = 2\na + b }");

    let entry = entry.expect("compiles");
    let ops = stream_ops(&core, entry);

    let begins = ops
        .iter()
        .filter(|i| matches!(i.op, Op::ScopeBegin { .. }))
        .count();
    let ends = ops
        .iter()
        .filter(|i| i.op.tag() == OpTag::ScopeEnd)
        .count();

    assert_eq!(begins, 1);
    assert_eq!(ends, 1);

    let member_count = ops
        .iter()
        .find_map(|i| match i.op {
            Op::ScopeBegin { member_count } => Some(member_count),
            _ => None,
        })
        .expect("scope begin present");

    assert_eq!(member_count, 2);

    // Locals resolve to scope slots, not globals.
    assert!(ops
        .iter()
        .any(|i| matches!(i.op, Op::LoadScope { out: 0, rank: 0 })));
    assert!(ops
        .iter()
        .any(|i| matches!(i.op, Op::LoadScope { out: 0, rank: 1 })));
}

#[test]
fn member_access_on_literal_is_a_lowering_error() {
    let (core, entry) = compile("r :: x.2");

    assert!(entry.is_none());
    assert!(core.errors.has_errors());
}

#[test]
fn literals_are_annotated_with_comptime_types() {
    let (core, entry) = compile("x :: 42");

    let _ = entry.expect("compiles");

    // The definition's value child carries a type annotation after lowering.
    let root = osier_syntax::AstNodeId::from_raw(0);
    let file = core.asts.node(root);

    let definition = osier_syntax::AstDirectChildIterator::new(file)
        .next()
        .expect("one definition");
    let literal = osier_syntax::AstDirectChildIterator::new(definition)
        .next()
        .expect("one literal");

    let annotation =
        osier_types::TypeIdWithAssignability::from_raw(literal.type_id_with_assignability());

    assert!(!annotation.id().is_invalid());
    assert_eq!(
        core.types.type_tag_from_id(annotation.id()),
        osier_types::TypeTag::CompInteger
    );
}
