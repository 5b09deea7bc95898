//! Opcode stream storage.

use core::fmt;

use osier_pool::ReservedVec;

use crate::op::{decode_at, DecodeError, Instr, Op, OpTag};
use crate::OpcodeId;

/// Append-only store of encoded instructions.
///
/// Emission is single-writer within a compilation unit; ids handed out by
/// [`OpcodePool::emit`] stay valid for the pool's lifetime. Sub-streams (loop
/// bodies, completion callbacks) are emitted before the instructions that
/// reference them, each terminated by `EndCode`.
pub struct OpcodePool {
    code: ReservedVec,
    scratch: Vec<u8>,
}

impl OpcodePool {
    /// Creates a pool with defaults sized for a single compilation unit.
    pub fn new() -> Self {
        Self::with_capacity(1 << 26, 1 << 16)
    }

    /// Creates a pool over an explicit reservation; see [`ReservedVec::new`].
    pub fn with_capacity(reserve_bytes: usize, commit_bytes: usize) -> Self {
        Self {
            code: ReservedVec::new(reserve_bytes, commit_bytes),
            scratch: Vec::new(),
        }
    }

    /// Appends `op`, returning the id of the emitted instruction.
    pub fn emit(&mut self, op: &Op) -> OpcodeId {
        self.emit_instr(op, false)
    }

    /// Appends `op` with the consumes-write-context bit set.
    pub fn emit_consuming_write_ctx(&mut self, op: &Op) -> OpcodeId {
        self.emit_instr(op, true)
    }

    fn emit_instr(&mut self, op: &Op, consumes_write_ctx: bool) -> OpcodeId {
        self.scratch.clear();

        op.encode_into(consumes_write_ctx, &mut self.scratch);

        let offset = self.code.append_exact(&self.scratch);

        OpcodeId::from_raw(offset as u32)
    }

    /// Decodes the instruction at `id`.
    ///
    /// Returns the instruction and the id one past it (`None` after
    /// `EndCode`).
    pub fn read_at(&self, id: OpcodeId) -> Result<(Instr, Option<OpcodeId>), DecodeError> {
        let (instr, next) = decode_at(self.code.as_bytes(), id.to_raw() as usize)?;

        let next = if instr.op.tag() == OpTag::EndCode {
            None
        } else {
            Some(OpcodeId::from_raw(next as u32))
        };

        Ok((instr, next))
    }

    /// Reader positioned at `start`.
    pub fn reader_at(&self, start: OpcodeId) -> OpcodeReader<'_> {
        OpcodeReader {
            pool: self,
            cursor: Some(start),
            failed: false,
        }
    }

    /// Bytes emitted so far.
    pub fn used_bytes(&self) -> usize {
        self.code.used()
    }

    /// The raw encoded stream.
    pub fn as_bytes(&self) -> &[u8] {
        self.code.as_bytes()
    }
}

impl Default for OpcodePool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OpcodePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpcodePool")
            .field("used_bytes", &self.code.used())
            .finish()
    }
}

/// Iterates one stream's instructions, ending after `EndCode`.
///
/// Yields `(id, instr)` pairs; a decode failure yields the error once and
/// stops.
pub struct OpcodeReader<'a> {
    pool: &'a OpcodePool,
    cursor: Option<OpcodeId>,
    failed: bool,
}

impl Iterator for OpcodeReader<'_> {
    type Item = Result<(OpcodeId, Instr), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        let id = self.cursor?;

        match self.pool.read_at(id) {
            Ok((instr, next)) => {
                self.cursor = next;

                Some(Ok((id, instr)))
            }
            Err(error) => {
                self.failed = true;

                Some(Err(error))
            }
        }
    }
}
