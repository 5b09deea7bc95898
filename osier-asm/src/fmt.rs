//! Opcode stream formatter.
//!
//! One instruction per line: `<id>  [@] <name> <operands>`, with `@` marking
//! instructions that consume the write context. Referenced sub-streams are
//! printed after the current stream, separated by blank lines.

use std::io::{self, Write};

use osier_pool::{IdentifierId, IdentifierPool};

use crate::op::{Op, SignatureFlags, SignatureParameterFlags};
use crate::pool::OpcodePool;
use crate::{OpcodeId, ReferenceTypeFlags};

fn identifier_text<'a>(identifiers: &'a IdentifierPool, id: IdentifierId) -> &'a [u8] {
    if id.is_invalid() {
        b"<unnamed>"
    } else {
        identifiers.entry_from_id(id).bytes()
    }
}

fn write_name(
    out: &mut dyn Write,
    identifiers: &IdentifierPool,
    id: IdentifierId,
) -> io::Result<()> {
    write!(out, "name={} (", id)?;
    out.write_all(identifier_text(identifiers, id))?;
    write!(out, ")")
}

fn write_parameter_flags(out: &mut dyn Write, flags: SignatureParameterFlags) -> io::Result<()> {
    write!(
        out,
        "mut={} eval={} type={} default={}",
        flags.contains(SignatureParameterFlags::IS_MUT),
        flags.contains(SignatureParameterFlags::IS_EVAL),
        flags.contains(SignatureParameterFlags::HAS_TYPE),
        flags.contains(SignatureParameterFlags::HAS_DEFAULT),
    )
}

/// Operands of one instruction; gathers referenced sub-stream ids into
/// `refs`.
fn write_operands(
    out: &mut dyn Write,
    identifiers: &IdentifierPool,
    op: &Op,
    refs: &mut Vec<OpcodeId>,
) -> io::Result<()> {
    match op {
        Op::ScopeBegin { member_count } => write!(out, " member_count={member_count}")?,
        Op::ScopeAllocTyped { is_mut } | Op::ScopeAllocUntyped { is_mut } => {
            write!(out, " is_mut={is_mut}")?
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
        } => write!(
            out,
            " is_mut={is_mut} file_index={} rank={rank}",
            file_index.to_raw()
        )?,
        Op::LoadScope { out: scope_out, rank } => write!(out, " out={scope_out} rank={rank}")?,
        Op::LoadGlobal { file_index, rank } => {
            write!(out, " file_index={} rank={rank}", file_index.to_raw())?
        }
        Op::LoadMember { name } => {
            write!(out, " ")?;
            write_name(out, identifiers, *name)?;
        }
        Op::LoadClosure { rank } => write!(out, " rank={rank}")?,
        Op::LoadBuiltin { builtin } | Op::ExecBuiltin { builtin } => {
            write!(out, " {builtin}")?
        }
        Op::Signature {
            flags,
            value_count,
            parameters,
        } => {
            write!(
                out,
                " {} param_count={} value_count={value_count}",
                if flags.contains(SignatureFlags::IS_FUNC) {
                    "func"
                } else {
                    "proc"
                },
                parameters.len(),
            )?;

            for (i, parameter) in parameters.iter().enumerate() {
                write!(out, "\n     -        {i:2}: ")?;
                write_parameter_flags(out, parameter.flags)?;
                write!(out, " ")?;
                write_name(out, identifiers, parameter.name)?;
            }
        }
        Op::DynSignature {
            flags,
            value_count,
            closed_count,
            return_completion,
            parameters,
        } => {
            write!(
                out,
                " {} param_count={} value_count={value_count} closed_count={closed_count}",
                if flags.contains(SignatureFlags::IS_FUNC) {
                    "func"
                } else {
                    "proc"
                },
                parameters.len(),
            )?;

            if let Some(completion) = return_completion {
                write!(out, " return_completion={completion}")?;
                refs.push(*completion);
            }

            for (i, parameter) in parameters.iter().enumerate() {
                write!(out, "\n     -        {i:2}: ")?;
                write_parameter_flags(out, parameter.flags)?;
                write!(out, " ")?;
                write_name(out, identifiers, parameter.name)?;

                if let Some(completion) = parameter.completion {
                    write!(out, " completion={completion}")?;
                    refs.push(completion);
                }
            }
        }
        Op::BindBody { body } => {
            write!(out, " body={body}")?;
            refs.push(*body);
        }
        Op::BindBodyWithClosure { body, closed_count } => {
            write!(out, " body={body} closed_value_count={closed_count}")?;
            refs.push(*body);
        }
        Op::PrepareArgs { arguments } => {
            write!(out, " count={}", arguments.len())?;

            for (i, (name, callback)) in arguments.iter().enumerate() {
                write!(out, "\n     -        {i:2}: callback={callback} ")?;
                write_name(out, identifiers, *name)?;
                refs.push(*callback);
            }
        }
        Op::CompleteParamTypedNoDefault { rank }
        | Op::CompleteParamTypedWithDefault { rank }
        | Op::CompleteParamUntyped { rank } => write!(out, " rank={rank}")?,
        Op::ArrayPreInit {
            leading_elem_count,
            following_elem_counts,
        } => {
            write!(
                out,
                " index_count={} leading_elem_count={leading_elem_count}",
                following_elem_counts.len(),
            )?;

            for count in following_elem_counts {
                write!(out, "\n     -        following_elem_count={count}")?;
            }
        }
        Op::ArrayPostInit {
            total_elem_count,
            leading_elem_count,
            following_elem_counts,
        } => {
            write!(
                out,
                " index_count={} leading_elem_count={leading_elem_count} total_elem_count={total_elem_count}",
                following_elem_counts.len(),
            )?;

            for count in following_elem_counts {
                write!(out, "\n     -        following_elem_count={count}")?;
            }
        }
        Op::CompositePreInit {
            leading_initializer_count,
            names,
        } => {
            write!(
                out,
                " names_count={} leading_initializer_count={leading_initializer_count}",
                names.len(),
            )?;

            for (name, following) in names {
                write!(out, "\n     -        following_initializer_count={following} ")?;
                write_name(out, identifiers, *name)?;
            }
        }
        Op::CompositePostInit { members } => {
            write!(out, " member_count={}", members.len())?;

            for name in members {
                write!(out, "\n     -        ")?;
                write_name(out, identifiers, *name)?;
            }
        }
        Op::If { consequent } => {
            write!(out, " consequent={consequent}")?;
            refs.push(*consequent);
        }
        Op::IfElse {
            consequent,
            alternative,
        } => {
            write!(out, " consequent={consequent} alternative={alternative}")?;
            refs.push(*consequent);
            refs.push(*alternative);
        }
        Op::Loop { condition, body } => {
            write!(out, " cond={condition} body={body}")?;
            refs.push(*condition);
            refs.push(*body);
        }
        Op::LoopFinally {
            condition,
            body,
            finally,
        } => {
            write!(out, " cond={condition} body={body} finally={finally}")?;
            refs.push(*condition);
            refs.push(*body);
            refs.push(*finally);
        }
        Op::Slice { kind } => write!(out, " {kind}")?,
        Op::BinaryArithmeticOp { kind } => write!(out, " {kind}")?,
        Op::Shift { kind } => write!(out, " {kind}")?,
        Op::BinaryBitwiseOp { kind } => write!(out, " {kind}")?,
        Op::Compare { kind } => write!(out, " {kind}")?,
        Op::ReferenceType { flags } => {
            if flags.contains(ReferenceTypeFlags::IS_SLICE) {
                write!(
                    out,
                    " Slice is_mut={}",
                    flags.contains(ReferenceTypeFlags::IS_MUT)
                )?;
            } else {
                write!(
                    out,
                    " Ptr is_mut={} is_multi={} is_opt={}",
                    flags.contains(ReferenceTypeFlags::IS_MUT),
                    flags.contains(ReferenceTypeFlags::IS_MULTI),
                    flags.contains(ReferenceTypeFlags::IS_OPT),
                )?;
            }
        }
        Op::ValueInteger { value } => {
            write!(out, " CompIntegerValue<{}>", value.to_u64())?
        }
        Op::ValueFloat { value } => write!(out, " CompFloatValue<{}>", value.to_f64())?,
        Op::ValueString { value } => write!(out, " {value}")?,
        _ => {}
    }

    Ok(())
}

fn print_stream(
    out: &mut dyn Write,
    identifiers: &IdentifierPool,
    pool: &OpcodePool,
    start: OpcodeId,
    follow_refs: bool,
) -> io::Result<()> {
    let mut refs = Vec::new();

    for item in pool.reader_at(start) {
        let (id, instr) = match item {
            Ok(entry) => entry,
            Err(error) => {
                writeln!(out, "  <decode error: {error}>")?;

                break;
            }
        };

        write!(
            out,
            "{:6}  {} {}",
            id.to_raw(),
            if instr.consumes_write_ctx { '@' } else { ' ' },
            instr.op.tag(),
        )?;

        write_operands(out, identifiers, &instr.op, &mut refs)?;
        writeln!(out)?;
    }

    writeln!(out)?;

    if follow_refs {
        for reference in refs {
            print_stream(out, identifiers, pool, reference, true)?;
        }
    }

    Ok(())
}

/// Prints the stream beginning at `start`; with `follow_refs`, referenced
/// sub-streams are printed after it.
pub fn print_opcodes(
    out: &mut dyn Write,
    identifiers: &IdentifierPool,
    pool: &OpcodePool,
    start: OpcodeId,
    follow_refs: bool,
) -> io::Result<()> {
    print_stream(out, identifiers, pool, start, follow_refs)
}
