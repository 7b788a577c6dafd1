//! RV64 instruction encoding
//!
//! Only the formats the stubs need: base 32-bit encodings (I/S/U/J) plus the
//! 16-bit `c.nop` used to pad 2-byte aligned positions.
//!
//! # Key constraints
//!
//! - Fixed 32-bit base instruction encoding, 16-bit compressed forms (RVC)
//! - Limited immediate sizes (12-bit signed, 20-bit upper)
//! - PC-relative addresses are built from AUIPC + a 12-bit low part
//! - Absolute 48-bit addresses need the five-instruction `movptr` sequence

use super::Register;

/// Encoding of `addi x0, x0, 0`
pub const NOP: u32 = 0x0000_0013;

/// Encoding of `c.nop`
pub const C_NOP: u16 = 0x0001;

/// Width of a base (uncompressed) instruction in bytes
pub const INSTRUCTION_SIZE: usize = 4;

/// RV64 encoder namespace
pub struct Rv64;

impl Rv64 {
    /// Encode an I-type instruction
    pub fn encode_i_type(opcode: u8, rd: Register, funct3: u8, rs1: Register, imm12: i32) -> u32 {
        ((imm12 as u32 & 0xFFF) << 20)
            | ((rs1.encoding() as u32 & 0x1F) << 15)
            | ((funct3 as u32 & 0x7) << 12)
            | ((rd.encoding() as u32 & 0x1F) << 7)
            | (opcode as u32 & 0x7F)
    }

    /// Encode an S-type instruction
    pub fn encode_s_type(opcode: u8, funct3: u8, rs1: Register, rs2: Register, imm12: i32) -> u32 {
        let imm_11_5 = (imm12 >> 5) & 0x7F;
        let imm_4_0 = imm12 & 0x1F;
        ((imm_11_5 as u32) << 25)
            | ((rs2.encoding() as u32 & 0x1F) << 20)
            | ((rs1.encoding() as u32 & 0x1F) << 15)
            | ((funct3 as u32 & 0x7) << 12)
            | ((imm_4_0 as u32) << 7)
            | (opcode as u32 & 0x7F)
    }

    /// Encode a U-type instruction (LUI, AUIPC)
    pub fn encode_u_type(opcode: u8, rd: Register, imm20: i32) -> u32 {
        ((imm20 as u32 & 0xFFFFF) << 12) | ((rd.encoding() as u32 & 0x1F) << 7) | (opcode as u32 & 0x7F)
    }

    /// Encode a J-type instruction (JAL)
    pub fn encode_j_type(opcode: u8, rd: Register, imm21: i32) -> u32 {
        let imm_20 = (imm21 >> 20) & 0x1;
        let imm_10_1 = (imm21 >> 1) & 0x3FF;
        let imm_11 = (imm21 >> 11) & 0x1;
        let imm_19_12 = (imm21 >> 12) & 0xFF;
        ((imm_20 as u32) << 31)
            | ((imm_10_1 as u32) << 21)
            | ((imm_11 as u32) << 20)
            | ((imm_19_12 as u32) << 12)
            | ((rd.encoding() as u32 & 0x1F) << 7)
            | (opcode as u32 & 0x7F)
    }

    /// Encode ADDI rd, rs1, imm12
    pub fn encode_addi(rd: Register, rs1: Register, imm12: i32) -> u32 {
        Self::encode_i_type(0x13, rd, 0x0, rs1, imm12)
    }

    /// Encode SLLI rd, rs1, shamt (6-bit shift amount on RV64)
    pub fn encode_slli(rd: Register, rs1: Register, shamt: u32) -> u32 {
        Self::encode_i_type(0x13, rd, 0x1, rs1, (shamt & 0x3F) as i32)
    }

    /// Encode SD rs2, offset(rs1)
    pub fn encode_sd(rs1: Register, rs2: Register, offset: i32) -> u32 {
        Self::encode_s_type(0x23, 0x3, rs1, rs2, offset)
    }

    /// Encode LUI rd, imm20
    pub fn encode_lui(rd: Register, imm20: i32) -> u32 {
        Self::encode_u_type(0x37, rd, imm20)
    }

    /// Encode AUIPC rd, imm20
    pub fn encode_auipc(rd: Register, imm20: i32) -> u32 {
        Self::encode_u_type(0x17, rd, imm20)
    }

    /// Encode JAL rd, offset
    pub fn encode_jal(rd: Register, offset: i32) -> u32 {
        Self::encode_j_type(0x6F, rd, offset)
    }

    /// Encode JALR rd, offset(rs1)
    pub fn encode_jalr(rd: Register, rs1: Register, offset: i32) -> u32 {
        Self::encode_i_type(0x67, rd, 0x0, rs1, offset)
    }

    /// Whether `value` fits in a signed immediate of `bits` bits
    #[inline]
    pub fn fits_signed(value: i64, bits: u32) -> bool {
        let min = -(1i64 << (bits - 1));
        let max = (1i64 << (bits - 1)) - 1;
        (min..=max).contains(&value)
    }

    /// Split a PC-relative distance into an AUIPC upper part and a 12-bit
    /// signed low part, or `None` when AUIPC cannot reach it.
    pub fn split_pc_relative(distance: i64) -> Option<(i32, i32)> {
        let hi = distance.checked_add(0x800)? >> 12;
        if !Self::fits_signed(hi, 20) {
            return None;
        }
        let lo = distance - (hi << 12);
        debug_assert!(Self::fits_signed(lo, 12));
        Some((hi as i32, lo as i32))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_encodings() {
        assert_eq!(Rv64::encode_auipc(Register::T0, 0), 0x0000_0297);
        assert_eq!(Rv64::encode_jalr(Register::ZERO, Register::T0, 0), 0x0002_8067);
        assert_eq!(Rv64::encode_jal(Register::ZERO, 0), 0x0000_006f);
        assert_eq!(Rv64::encode_addi(Register::ZERO, Register::ZERO, 0), NOP);
        assert_eq!(Rv64::encode_lui(Register::T0, 1), 0x0000_12b7);
    }

    #[test]
    fn test_encode_sd() {
        // sd t0, 8(s7)
        assert_eq!(Rv64::encode_sd(Register::S7, Register::T0, 8), 0x005b_b423);
    }

    #[test]
    fn test_encode_slli() {
        // slli t0, t0, 11
        assert_eq!(Rv64::encode_slli(Register::T0, Register::T0, 11), 0x00b2_9293);
    }

    #[test]
    fn test_split_pc_relative() {
        for distance in [0i64, 4, -4, 0x7ff, 0x800, -0x800, -0x801, 0x1234_5678, -0x7fff_f000] {
            let (hi, lo) = Rv64::split_pc_relative(distance).unwrap();
            assert!(Rv64::fits_signed(lo as i64, 12));
            assert_eq!(((hi as i64) << 12) + lo as i64, distance);
        }
    }

    #[test]
    fn test_split_pc_relative_out_of_reach() {
        assert!(Rv64::split_pc_relative(1i64 << 32).is_none());
        assert!(Rv64::split_pc_relative(-(1i64 << 32)).is_none());
        // Largest reachable distance still rounds into range
        assert!(Rv64::split_pc_relative(0x7fff_f7ff).is_some());
        assert!(Rv64::split_pc_relative(0x7fff_f800).is_none());
    }

    #[test]
    fn test_split_pc_relative_extreme_distances() {
        assert!(Rv64::split_pc_relative(i64::MAX).is_none());
        assert!(Rv64::split_pc_relative(i64::MAX - 0x7ff).is_none());
        assert!(Rv64::split_pc_relative(i64::MIN).is_none());
    }
}
