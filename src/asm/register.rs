//! RV64 integer registers
//!
//! | Register | ABI Name | Role in generated code |
//! |----------|----------|------------------------|
//! | x0 | zero | Hard-wired zero |
//! | x1 | ra | Return address |
//! | x2 | sp | Stack pointer |
//! | x5 | t0 | Stub scratch register |
//! | x8 | s0/fp | Frame pointer |
//! | x10-x17 | a0-a7 | Arguments |
//! | x23 | s7 | Current thread (`XTHREAD`) |

use std::fmt;

/// An integer register (`x0`..`x31`)
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register(u8);

impl Register {
    pub const ZERO: Register = Register(0);
    pub const RA: Register = Register(1);
    pub const SP: Register = Register(2);
    pub const GP: Register = Register(3);
    pub const TP: Register = Register(4);
    pub const T0: Register = Register(5);
    pub const T1: Register = Register(6);
    pub const T2: Register = Register(7);
    pub const FP: Register = Register(8);
    pub const S1: Register = Register(9);
    pub const A0: Register = Register(10);
    pub const A1: Register = Register(11);
    pub const S7: Register = Register(23);

    /// Register holding the current thread pointer in compiled code
    pub const XTHREAD: Register = Register::S7;

    /// Create a register from its 5-bit encoding
    pub fn new(encoding: u8) -> Option<Self> {
        (encoding < 32).then_some(Register(encoding))
    }

    /// 5-bit register number used in instruction encodings
    #[inline(always)]
    pub fn encoding(self) -> u8 {
        self.0
    }

    /// ABI mnemonic
    pub fn abi_name(self) -> &'static str {
        const NAMES: [&str; 32] = [
            "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "fp", "s1", "a0", "a1", "a2", "a3",
            "a4", "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11",
            "t3", "t4", "t5", "t6",
        ];
        NAMES[self.0 as usize]
    }
}

impl fmt::Debug for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abi_name())
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abi_name())
    }
}
