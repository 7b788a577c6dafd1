//! Method entry barrier stub
//!
//! The method prologue branches here when its inline guard check fails. The
//! stub calls the shared entry-barrier routine, which reads the guard word and
//! either returns (fast path, continue at `continuation`) or diverts the call.
//!
//! ```text
//! entry:
//!     movptr t0, method_entry_barrier   ; 5 insns
//!     jalr   ra, %lo(barrier)(t0)
//!     j      continuation
//!     .align 4                          ; c.nop when needed
//! guard:
//!     .word  0                          ; entry_guard relocation
//! ```
//!
//! The guard word is flipped by another thread with one 32-bit atomic store
//! while the method runs. It must therefore sit at a 4-byte aligned address;
//! a misaligned word could be observed half-written.

use super::{CodeStub, RuntimeStubs, StubKind};
use crate::asm::{AsmResult, Label, MacroAssembler, Register, RelocKind};

/// movptr (5) + jalr + j + guard word, plus one instruction width of
/// alignment slack
const MAX_SIZE: usize = 8 * 4 + 4;

/// Initial guard value: disarmed
pub const GUARD_DISARMED: u32 = 0;

/// Slow path of a compiled method's entry barrier
#[derive(Debug, Clone)]
pub struct EntryBarrierStub {
    entry: Label,
    guard: Label,
    continuation: Label,
    barrier: u64,
}

impl EntryBarrierStub {
    /// `continuation` is the method body's first real instruction, bound by
    /// the caller.
    pub fn new<M: MacroAssembler>(masm: &mut M, continuation: Label, runtime: &RuntimeStubs) -> Self {
        Self {
            entry: masm.new_label(),
            guard: masm.new_label(),
            continuation,
            barrier: runtime.method_entry_barrier,
        }
    }

    /// Label of the guard word
    pub fn guard(&self) -> Label {
        self.guard
    }

    /// Label the fast path resumes at
    pub fn continuation(&self) -> Label {
        self.continuation
    }
}

impl CodeStub for EntryBarrierStub {
    fn kind(&self) -> StubKind {
        StubKind::EntryBarrier
    }

    fn max_size(&self) -> usize {
        MAX_SIZE
    }

    fn entry(&self) -> Label {
        self.entry
    }

    fn emit<M: MacroAssembler>(&self, masm: &mut M) -> AsmResult<()> {
        masm.bind(self.entry)?;

        let offset = masm.movptr(Register::T0, self.barrier)?;
        masm.jalr(Register::RA, Register::T0, offset)?;
        masm.j(self.continuation)?;

        masm.align(4);
        masm.bind(self.guard)?;
        masm.relocate(RelocKind::EntryGuard, |masm| {
            masm.emit_u32(GUARD_DISARMED);
            Ok(())
        })
    }
}
