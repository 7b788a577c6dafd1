//! Safepoint poll return stub
//!
//! Reached from a poll site once the poll reports a pending stop request.
//! Records the poll site's PC in the thread's saved-exception-pc slot and
//! jumps to the polling-page return handler, which decides whether to
//! resume, deoptimize or dispatch an exception. Control never comes back.
//!
//! ```text
//! entry:
//!     auipc t0, %hi(poll_pc)        ; or movptr t0, poll_pc (5 insns)
//!     addi  t0, t0, %lo(poll_pc)
//!     sd    t0, saved_pc_offset(xthread)
//!     auipc t0, %hi(handler)        ; or movptr t0, handler (5 insns)
//!     jalr  zero, %lo(handler)(t0)
//! ```

use super::{CodeStub, RuntimeStubs, StubKind};
use crate::asm::{AsmResult, Label, MacroAssembler, Register, RelocKind};

/// Worst case: movptr + addi, sd, movptr + jalr
const MAX_SIZE: usize = 13 * 4;

/// Out-of-line return path for one safepoint poll site
#[derive(Debug, Clone)]
pub struct SafepointPollStub {
    entry: Label,
    /// Offset of the poll instruction from the start of the code buffer
    safepoint_offset: usize,
    handler: u64,
    saved_pc_offset: i32,
}

impl SafepointPollStub {
    pub fn new<M: MacroAssembler>(masm: &mut M, safepoint_offset: usize, runtime: &RuntimeStubs) -> Self {
        Self {
            entry: masm.new_label(),
            safepoint_offset,
            handler: runtime.polling_page_return_handler,
            saved_pc_offset: runtime.saved_exception_pc_offset,
        }
    }

    /// Offset of the poll site this stub returns for
    pub fn safepoint_offset(&self) -> usize {
        self.safepoint_offset
    }
}

impl CodeStub for SafepointPollStub {
    fn kind(&self) -> StubKind {
        StubKind::SafepointPoll
    }

    fn max_size(&self) -> usize {
        MAX_SIZE
    }

    fn entry(&self) -> Label {
        self.entry
    }

    fn emit<M: MacroAssembler>(&self, masm: &mut M) -> AsmResult<()> {
        masm.bind(self.entry)?;

        let safepoint_pc = masm.code_start() + self.safepoint_offset as u64;
        masm.relocate(RelocKind::InternalWord { target: safepoint_pc }, |masm| {
            let offset = masm.la_patchable(Register::T0, safepoint_pc)?;
            masm.addi(Register::T0, Register::T0, offset)
        })?;
        masm.sd(Register::T0, Register::XTHREAD, self.saved_pc_offset)?;
        masm.far_jump(self.handler)
    }
}
