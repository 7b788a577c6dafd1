//! Assembler seam for stub emission
//!
//! Stubs never touch bytes directly: they drive a [`MacroAssembler`], which
//! supplies label binding, relocation tagging and raw emission. The provided
//! methods build the multi-instruction sequences (`movptr`, `la_patchable`,
//! `far_jump`, `align`) on top of those primitives, so every implementation
//! produces identical layouts.
//!
//! ```text
//!   Stub::emit ──► MacroAssembler (provided sequences)
//!                        │
//!                        ▼
//!                  CodeBuffer (bytes, labels, relocations)
//!                        │ finish()
//!                        ▼
//!                  InstalledCode (AtomicU32 words)
//! ```

pub mod buffer;
pub mod encode;
pub mod register;

pub use buffer::{CodeBuffer, InstalledCode};
pub use encode::{Rv64, C_NOP, INSTRUCTION_SIZE, NOP};
pub use register::Register;

use thiserror::Error;

/// Assembler errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmError {
    #[error("label {0:?} does not belong to this buffer")]
    UnknownLabel(Label),
    #[error("label {0:?} is already bound")]
    LabelRebound(Label),
    #[error("label {0:?} is referenced but never bound")]
    UnboundLabel(Label),
    #[error("jump displacement {0} is out of range for jal")]
    BranchOutOfRange(i64),
    #[error("immediate {value} does not fit in {bits} bits")]
    ImmediateOutOfRange { value: i64, bits: u32 },
    #[error("address {0:#x} is outside the movptr range")]
    AddressOutOfRange(u64),
    #[error("code start {0:#x} is not 4-byte aligned")]
    MisalignedCodeStart(u64),
}

/// Result type for assembler operations
pub type AsmResult<T> = Result<T, AsmError>;

/// Highest address (exclusive) `movptr` can materialize
pub const MOVPTR_LIMIT: u64 = 1 << 47;

/// A position in a code buffer, bound at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub(crate) usize);

/// Relocation attached to an emitted instruction sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// Address of a location inside the same code blob
    InternalWord { target: u64 },
    /// Address of a runtime routine outside the code blob
    RuntimeCall { target: u64 },
    /// The entry-barrier guard word patched by the runtime
    EntryGuard,
}

/// A relocation record: the byte offset where the tagged sequence starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Relocation {
    pub offset: usize,
    pub kind: RelocKind,
}

/// Primitives the stubs emit through
pub trait MacroAssembler {
    /// Absolute address the buffer will be installed at
    fn code_start(&self) -> u64;

    /// Current emission offset in bytes
    fn offset(&self) -> usize;

    /// Absolute address of the next emitted byte
    fn pc(&self) -> u64 {
        self.code_start() + self.offset() as u64
    }

    /// Allocate an unbound label
    fn new_label(&mut self) -> Label;

    /// Bind `label` to the current offset
    fn bind(&mut self, label: Label) -> AsmResult<()>;

    /// Tag everything `emit` writes with `reloc`
    fn relocate<F>(&mut self, reloc: RelocKind, emit: F) -> AsmResult<()>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> AsmResult<()>;

    /// Emit a raw 32-bit word
    fn emit_u32(&mut self, word: u32);

    /// Emit a raw 16-bit halfword
    fn emit_u16(&mut self, half: u16);

    /// JAL rd, label (forward references are fixed up on bind)
    fn jal(&mut self, rd: Register, label: Label) -> AsmResult<()>;

    /// Unconditional short jump to `label`
    fn j(&mut self, label: Label) -> AsmResult<()> {
        self.jal(Register::ZERO, label)
    }

    fn addi(&mut self, rd: Register, rs1: Register, imm: i32) -> AsmResult<()> {
        check_imm12(imm)?;
        self.emit_u32(Rv64::encode_addi(rd, rs1, imm));
        Ok(())
    }

    fn slli(&mut self, rd: Register, rs1: Register, shamt: u32) -> AsmResult<()> {
        if shamt > 63 {
            return Err(AsmError::ImmediateOutOfRange { value: shamt as i64, bits: 6 });
        }
        self.emit_u32(Rv64::encode_slli(rd, rs1, shamt));
        Ok(())
    }

    /// SD rs2, offset(base)
    fn sd(&mut self, rs2: Register, base: Register, offset: i32) -> AsmResult<()> {
        check_imm12(offset)?;
        self.emit_u32(Rv64::encode_sd(base, rs2, offset));
        Ok(())
    }

    /// JALR rd, offset(rs1)
    fn jalr(&mut self, rd: Register, rs1: Register, offset: i32) -> AsmResult<()> {
        check_imm12(offset)?;
        self.emit_u32(Rv64::encode_jalr(rd, rs1, offset));
        Ok(())
    }

    /// Load the upper bits of `target` into `rd` with a fixed five
    /// instruction sequence and return the low 6 bits for the consumer
    /// (`jalr`, `addi` or a load).
    fn movptr(&mut self, rd: Register, target: u64) -> AsmResult<i32> {
        if target >= MOVPTR_LIMIT {
            return Err(AsmError::AddressOutOfRange(target));
        }
        let imm64 = target as i64;

        // Upper 31 bits
        let imm = imm64 >> 17;
        let lower = (imm << 52) >> 52;
        let upper = imm - lower;
        self.emit_u32(Rv64::encode_lui(rd, (upper >> 12) as i32));
        self.addi(rd, rd, lower as i32)?;

        // Remaining 17 bits
        self.slli(rd, rd, 11)?;
        self.addi(rd, rd, ((imm64 >> 6) & 0x7ff) as i32)?;
        self.slli(rd, rd, 6)?;

        Ok((imm64 & 0x3f) as i32)
    }

    /// Materialize `target` in `rd` as PC-relative when AUIPC reaches it,
    /// falling back to `movptr`. Returns the low part for the consumer.
    fn la_patchable(&mut self, rd: Register, target: u64) -> AsmResult<i32> {
        let distance = (target as i64).wrapping_sub(self.pc() as i64);
        match Rv64::split_pc_relative(distance) {
            Some((hi, lo)) => {
                self.emit_u32(Rv64::encode_auipc(rd, hi));
                Ok(lo)
            }
            None => self.movptr(rd, target),
        }
    }

    /// Jump to a runtime routine anywhere in the address space. Clobbers `t0`.
    fn far_jump(&mut self, target: u64) -> AsmResult<()>
    where
        Self: Sized,
    {
        self.relocate(RelocKind::RuntimeCall { target }, |masm| {
            let offset = masm.la_patchable(Register::T0, target)?;
            masm.jalr(Register::ZERO, Register::T0, offset)
        })
    }

    /// Pad with `c.nop`/`nop` until `pc()` is a multiple of `modulus`
    fn align(&mut self, modulus: usize) {
        debug_assert!(modulus.is_power_of_two() && modulus >= 2);
        let modulus = modulus as u64;
        while self.pc() % modulus != 0 {
            if self.pc() % INSTRUCTION_SIZE as u64 != 0 {
                self.emit_u16(C_NOP);
            } else {
                self.emit_u32(NOP);
            }
        }
    }
}

fn check_imm12(imm: i32) -> AsmResult<()> {
    if Rv64::fits_signed(imm as i64, 12) {
        Ok(())
    } else {
        Err(AsmError::ImmediateOutOfRange { value: imm as i64, bits: 12 })
    }
}
