//! Code buffer and installed code
//!
//! [`CodeBuffer`] is the byte-exact [`MacroAssembler`] used to lower one
//! compilation unit. [`InstalledCode`] is its finished image, stored as
//! `AtomicU32` words so that patchable words (entry guards) can be read and
//! written concurrently without tearing.

use super::{AsmError, AsmResult, Label, MacroAssembler, Register, RelocKind, Relocation, Rv64};
use std::sync::atomic::{AtomicU32, Ordering};

/// A JAL emitted before its target label was bound
#[derive(Debug, Clone, Copy)]
struct PendingJump {
    at: usize,
    label: Label,
    rd: Register,
}

/// Growable machine-code buffer targeting a known install address
#[derive(Debug)]
pub struct CodeBuffer {
    /// Absolute address the code will run at
    code_start: u64,
    /// Emitted bytes
    bytes: Vec<u8>,
    /// Bound offset for every allocated label
    labels: Vec<Option<usize>>,
    /// Forward jumps awaiting their label
    pending: Vec<PendingJump>,
    /// Relocation table in emission order
    relocations: Vec<Relocation>,
}

impl CodeBuffer {
    /// Create an empty buffer that will be installed at `code_start`
    pub fn new(code_start: u64) -> Self {
        Self::with_capacity(code_start, 0)
    }

    /// Create an empty buffer with `capacity` bytes reserved
    pub fn with_capacity(code_start: u64, capacity: usize) -> Self {
        debug_assert!(code_start % 2 == 0, "instructions are at least 2-byte aligned");
        Self {
            code_start,
            bytes: Vec::with_capacity(capacity),
            labels: Vec::new(),
            pending: Vec::new(),
            relocations: Vec::new(),
        }
    }

    /// Reserve room for at least `additional` more bytes
    pub fn reserve(&mut self, additional: usize) {
        self.bytes.reserve(additional);
    }

    /// Emitted bytes so far
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Relocations recorded so far
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Offset a label is bound to, if bound
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0).copied().flatten()
    }

    /// Read back the little-endian word at `offset`
    pub fn read_u32(&self, offset: usize) -> Option<u32> {
        let word = self.bytes.get(offset..offset + 4)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    /// Finish emission and lay the code out as atomically accessible words
    pub fn finish(self) -> AsmResult<InstalledCode> {
        if let Some(pending) = self.pending.first() {
            return Err(AsmError::UnboundLabel(pending.label));
        }
        if self.code_start % 4 != 0 {
            return Err(AsmError::MisalignedCodeStart(self.code_start));
        }

        let words = self
            .bytes
            .chunks(4)
            .map(|chunk| {
                let mut word = [0u8; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                AtomicU32::new(u32::from_le_bytes(word))
            })
            .collect();

        Ok(InstalledCode {
            code_start: self.code_start,
            len: self.bytes.len(),
            words,
            labels: self.labels,
            relocations: self.relocations,
        })
    }

    fn encode_jal_at(at: usize, target: usize, rd: Register) -> AsmResult<u32> {
        let displacement = target as i64 - at as i64;
        if !Rv64::fits_signed(displacement, 21) {
            return Err(AsmError::BranchOutOfRange(displacement));
        }
        Ok(Rv64::encode_jal(rd, displacement as i32))
    }

    fn patch_u32(&mut self, at: usize, word: u32) {
        self.bytes[at..at + 4].copy_from_slice(&word.to_le_bytes());
    }
}

impl MacroAssembler for CodeBuffer {
    fn code_start(&self) -> u64 {
        self.code_start
    }

    fn offset(&self) -> usize {
        self.bytes.len()
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn bind(&mut self, label: Label) -> AsmResult<()> {
        let here = self.bytes.len();
        match self.labels.get(label.0) {
            None => return Err(AsmError::UnknownLabel(label)),
            Some(Some(_)) => return Err(AsmError::LabelRebound(label)),
            Some(None) => {}
        }

        // Encode every waiting jump before touching anything: on failure the
        // label stays unbound and its jumps stay pending, so finish() rejects
        // the buffer.
        let patches = self
            .pending
            .iter()
            .filter(|jump| jump.label == label)
            .map(|jump| Self::encode_jal_at(jump.at, here, jump.rd).map(|word| (jump.at, word)))
            .collect::<AsmResult<Vec<(usize, u32)>>>()?;

        self.pending.retain(|jump| jump.label != label);
        for (at, word) in patches {
            self.patch_u32(at, word);
        }
        self.labels[label.0] = Some(here);
        Ok(())
    }

    fn relocate<F>(&mut self, reloc: RelocKind, emit: F) -> AsmResult<()>
    where
        F: FnOnce(&mut Self) -> AsmResult<()>,
    {
        self.relocations.push(Relocation {
            offset: self.bytes.len(),
            kind: reloc,
        });
        emit(self)
    }

    fn emit_u32(&mut self, word: u32) {
        self.bytes.extend_from_slice(&word.to_le_bytes());
    }

    fn emit_u16(&mut self, half: u16) {
        self.bytes.extend_from_slice(&half.to_le_bytes());
    }

    fn jal(&mut self, rd: Register, label: Label) -> AsmResult<()> {
        let at = self.bytes.len();
        let target = self
            .labels
            .get(label.0)
            .copied()
            .ok_or(AsmError::UnknownLabel(label))?;
        match target {
            Some(target) => {
                let word = Self::encode_jal_at(at, target, rd)?;
                self.emit_u32(word);
            }
            None => {
                self.pending.push(PendingJump { at, label, rd });
                self.emit_u32(Rv64::encode_jal(rd, 0));
            }
        }
        Ok(())
    }
}

/// Finished code image
///
/// The image is held as `AtomicU32` words starting at a 4-byte aligned
/// `code_start`, so any 4-byte aligned location inside it can be accessed as
/// a single atomic word.
#[derive(Debug)]
pub struct InstalledCode {
    code_start: u64,
    len: usize,
    words: Box<[AtomicU32]>,
    labels: Vec<Option<usize>>,
    relocations: Vec<Relocation>,
}

impl InstalledCode {
    /// Absolute install address
    pub fn code_start(&self) -> u64 {
        self.code_start
    }

    /// Code size in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Relocation table
    pub fn relocations(&self) -> &[Relocation] {
        &self.relocations
    }

    /// Offset a label was bound to
    pub fn label_offset(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0).copied().flatten()
    }

    /// The word at byte `offset`, when that offset is 4-byte aligned and in range
    pub fn word_at(&self, offset: usize) -> Option<&AtomicU32> {
        if offset % 4 != 0 || offset + 4 > self.len {
            return None;
        }
        self.words.get(offset / 4)
    }

    /// Copy of the current code bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes: Vec<u8> = self
            .words
            .iter()
            .flat_map(|word| word.load(Ordering::Relaxed).to_le_bytes())
            .collect();
        bytes.truncate(self.len);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{C_NOP, NOP};

    #[test]
    fn test_backward_jump() {
        let mut buf = CodeBuffer::new(0x1000);
        let top = buf.new_label();
        buf.bind(top).unwrap();
        buf.emit_u32(NOP);
        buf.j(top).unwrap();
        assert_eq!(buf.read_u32(4), Some(Rv64::encode_jal(Register::ZERO, -4)));
    }

    #[test]
    fn test_forward_jump_fixed_up_on_bind() {
        let mut buf = CodeBuffer::new(0x1000);
        let target = buf.new_label();
        buf.j(target).unwrap();
        buf.emit_u32(NOP);
        buf.bind(target).unwrap();
        assert_eq!(buf.read_u32(0), Some(Rv64::encode_jal(Register::ZERO, 8)));
        assert!(buf.finish().is_ok());
    }

    #[test]
    fn test_unbound_label_rejected_at_finish() {
        let mut buf = CodeBuffer::new(0x1000);
        let target = buf.new_label();
        buf.j(target).unwrap();
        assert_eq!(buf.finish().unwrap_err(), AsmError::UnboundLabel(target));
    }

    #[test]
    fn test_rebind_rejected() {
        let mut buf = CodeBuffer::new(0);
        let label = buf.new_label();
        buf.bind(label).unwrap();
        assert_eq!(buf.bind(label), Err(AsmError::LabelRebound(label)));
    }

    #[test]
    fn test_jump_out_of_range() {
        let mut buf = CodeBuffer::new(0);
        let top = buf.new_label();
        buf.bind(top).unwrap();
        for _ in 0..(1 << 18) + 1 {
            buf.emit_u32(NOP);
        }
        assert!(matches!(buf.j(top), Err(AsmError::BranchOutOfRange(_))));
    }

    #[test]
    fn test_failed_bind_leaves_jump_pending() {
        let mut buf = CodeBuffer::new(0);
        let target = buf.new_label();
        buf.j(target).unwrap();
        for _ in 0..(1 << 18) + 1 {
            buf.emit_u32(NOP);
        }
        assert_eq!(buf.bind(target), Err(AsmError::BranchOutOfRange(1_048_584)));
        assert_eq!(buf.label_offset(target), None);
        assert_eq!(buf.finish().unwrap_err(), AsmError::UnboundLabel(target));
    }

    #[test]
    fn test_failed_bind_keeps_other_patches() {
        let mut buf = CodeBuffer::new(0);
        let near = buf.new_label();
        let far = buf.new_label();
        buf.j(far).unwrap();
        buf.j(near).unwrap();
        buf.bind(near).unwrap();
        for _ in 0..(1 << 18) + 1 {
            buf.emit_u32(NOP);
        }
        assert!(buf.bind(far).is_err());
        // Only the out-of-range jump is still waiting; the other was patched
        assert_eq!(buf.read_u32(4), Some(Rv64::encode_jal(Register::ZERO, 4)));
        assert_eq!(buf.finish().unwrap_err(), AsmError::UnboundLabel(far));
    }

    #[test]
    fn test_align_pads_with_compressed_nop() {
        let mut buf = CodeBuffer::new(0x2000);
        buf.emit_u16(C_NOP);
        buf.align(4);
        assert_eq!(buf.offset(), 4);
        assert_eq!(buf.bytes(), &[0x01, 0x00, 0x01, 0x00]);

        buf.align(8);
        assert_eq!(buf.offset(), 8);
        assert_eq!(buf.read_u32(4), Some(NOP));
    }

    #[test]
    fn test_align_uses_absolute_address() {
        let mut buf = CodeBuffer::new(0x2002);
        buf.align(4);
        assert_eq!(buf.offset(), 2);
        assert_eq!(buf.pc() % 4, 0);
    }

    #[test]
    fn test_movptr_reconstructs_address() {
        for target in [0u64, 0x3f, 0x1234_5678_9abc, (1 << 47) - 1, 0x7fff_ffff_f800] {
            let mut buf = CodeBuffer::new(0);
            let low = buf.movptr(Register::T0, target).unwrap();
            assert_eq!(buf.offset(), 5 * 4);
            assert_eq!(simulate_movptr(buf.bytes()) + low as i64, target as i64);
        }
    }

    #[test]
    fn test_movptr_rejects_high_addresses() {
        let mut buf = CodeBuffer::new(0);
        assert_eq!(
            buf.movptr(Register::T0, 1 << 47),
            Err(AsmError::AddressOutOfRange(1 << 47))
        );
    }

    #[test]
    fn test_far_jump_to_non_canonical_address() {
        let mut buf = CodeBuffer::new(0);
        let target = i64::MAX as u64;
        assert_eq!(buf.far_jump(target), Err(AsmError::AddressOutOfRange(target)));
    }

    #[test]
    fn test_relocation_recorded_at_sequence_start() {
        let mut buf = CodeBuffer::new(0x4000);
        buf.emit_u32(NOP);
        buf.far_jump(0x4100).unwrap();
        assert_eq!(
            buf.relocations(),
            &[Relocation {
                offset: 4,
                kind: RelocKind::RuntimeCall { target: 0x4100 }
            }]
        );
        // auipc + jalr
        assert_eq!(buf.offset(), 12);
    }

    #[test]
    fn test_installed_words() {
        let mut buf = CodeBuffer::new(0x8000);
        buf.emit_u16(C_NOP);
        buf.emit_u32(NOP);
        let code = buf.finish().unwrap();
        assert_eq!(code.len(), 6);
        assert!(code.word_at(2).is_none());
        assert!(code.word_at(4).is_none());
        assert_eq!(code.to_bytes(), vec![0x01, 0x00, 0x13, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_misaligned_install_rejected() {
        let buf = CodeBuffer::new(0x8002);
        assert_eq!(buf.finish().unwrap_err(), AsmError::MisalignedCodeStart(0x8002));
    }

    /// Evaluate lui/addi/slli/addi/slli against a zeroed register
    fn simulate_movptr(bytes: &[u8]) -> i64 {
        let word = |i: usize| u32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap());
        let i_imm = |w: u32| ((w as i32) >> 20) as i64;
        let mut reg = ((word(0) & 0xFFFF_F000) as i32) as i64;
        reg += i_imm(word(1));
        reg <<= i_imm(word(2)) & 0x3f;
        reg += i_imm(word(3));
        reg <<= i_imm(word(4)) & 0x3f;
        reg
    }
}
