//! AST pretty-printer.
//!
//! Output shape: `NodeTag { field = value ... }` with `[...]` for child
//! arrays, four spaces per indentation level, strings quoted.

use std::io::{self, Write};

use osier_pool::IdentifierPool;

use crate::ast::{
    AstDirectChildIterator, AstFlags, AstNode, AstNodeId, AstPool, AstTag, BinaryOpKind,
    UnaryOpKind,
};

const INDENT_STEP: usize = 4;

fn write_indent(out: &mut dyn Write, depth: usize) -> io::Result<()> {
    write!(out, "{:width$}", "", width = depth * INDENT_STEP)
}

fn write_bytes_quoted(out: &mut dyn Write, bytes: &[u8]) -> io::Result<()> {
    out.write_all(b"\"")?;

    for &b in bytes {
        match b {
            b'"' => out.write_all(b"\\\"")?,
            b'\\' => out.write_all(b"\\\\")?,
            b'\n' => out.write_all(b"\\n")?,
            b'\r' => out.write_all(b"\\r")?,
            b'\t' => out.write_all(b"\\t")?,
            0x20..=0x7e => out.write_all(&[b])?,
            _ => write!(out, "\\x{b:02x}")?,
        }
    }

    out.write_all(b"\"")
}

fn write_flag_fields(out: &mut dyn Write, node: &AstNode<'_>, depth: usize) -> io::Result<()> {
    const NAMED: &[(AstFlags, &str)] = &[
        (AstFlags::IS_PUB, "is_pub"),
        (AstFlags::IS_COMPTIME, "is_comptime"),
        (AstFlags::IS_MUT, "is_mut"),
        (AstFlags::IS_MULTI, "is_multi"),
        (AstFlags::IS_OPT, "is_opt"),
        (AstFlags::HAS_INIT, "has_init"),
        (AstFlags::HAS_ELSE, "has_else"),
        (AstFlags::HAS_FINALLY, "has_finally"),
        (AstFlags::IS_FOR_EACH, "is_for_each"),
        (AstFlags::HAS_CONDITION, "has_condition"),
        (AstFlags::HAS_RETURN_TYPE, "has_return_type"),
        (AstFlags::HAS_BODY, "has_body"),
    ];

    let flags = node.flags();

    for &(flag, name) in NAMED {
        if flags.contains(flag) {
            write_indent(out, depth)?;
            writeln!(out, "{name} = true")?;
        }
    }

    Ok(())
}

fn write_value_fields(
    out: &mut dyn Write,
    node: &AstNode<'_>,
    identifiers: &IdentifierPool,
    strings: &IdentifierPool,
    depth: usize,
) -> io::Result<()> {
    match node.tag() {
        AstTag::Identifier | AstTag::Definition => {
            let id = osier_pool::IdentifierId::from_raw(node.ident_payload());

            write_indent(out, depth)?;
            write!(out, "name = ")?;
            write_bytes_quoted(out, identifiers.entry_from_id(id).bytes())?;
            writeln!(out)?;
        }
        AstTag::LitInt => {
            write_indent(out, depth)?;
            writeln!(out, "value = {}", node.int_payload())?;
        }
        AstTag::LitFloat => {
            write_indent(out, depth)?;
            writeln!(out, "value = {}", node.float_payload())?;
        }
        AstTag::LitChar => {
            let utf8 = node.char_payload();
            let len = utf8.iter().position(|&b| b == 0).unwrap_or(4).max(1);

            write_indent(out, depth)?;
            write!(out, "value = ")?;
            write_bytes_quoted(out, &utf8[..len])?;
            writeln!(out)?;
        }
        AstTag::LitString => {
            let id = osier_pool::IdentifierId::from_raw(node.string_payload());

            write_indent(out, depth)?;
            write!(out, "value = ")?;
            write_bytes_quoted(out, strings.entry_from_id(id).bytes())?;
            writeln!(out)?;
        }
        AstTag::BinaryOp => {
            let name = BinaryOpKind::from_u8(node.op_kind()).map_or("???", BinaryOpKind::name);

            write_indent(out, depth)?;
            writeln!(out, "op = {name}")?;
        }
        AstTag::UnaryOp => {
            let name = UnaryOpKind::from_u8(node.op_kind()).map_or("???", UnaryOpKind::name);

            write_indent(out, depth)?;
            writeln!(out, "op = {name}")?;
        }
        _ => {}
    }

    Ok(())
}

fn print_node(
    out: &mut dyn Write,
    node: AstNode<'_>,
    identifiers: &IdentifierPool,
    strings: &IdentifierPool,
    depth: usize,
) -> io::Result<()> {
    write_indent(out, depth)?;
    writeln!(out, "{} {{", node.tag())?;

    write_value_fields(out, &node, identifiers, strings, depth + 1)?;
    write_flag_fields(out, &node, depth + 1)?;

    if node.has_children() {
        write_indent(out, depth + 1)?;
        writeln!(out, "children = [")?;

        for child in AstDirectChildIterator::new(node) {
            print_node(out, child, identifiers, strings, depth + 2)?;
        }

        write_indent(out, depth + 1)?;
        writeln!(out, "]")?;
    }

    write_indent(out, depth)?;
    writeln!(out, "}}")
}

/// Pretty-prints the tree rooted at `root`.
pub fn print_ast(
    out: &mut dyn Write,
    asts: &AstPool,
    root: AstNodeId,
    identifiers: &IdentifierPool,
    strings: &IdentifierPool,
) -> io::Result<()> {
    print_node(out, asts.node(root), identifiers, strings, 0)
}
