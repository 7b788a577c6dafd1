//! Entry-guard patching
//!
//! Guard words are located purely from the relocation table; nothing here
//! decodes instructions. Each guard is an aligned [`AtomicU32`] accessed with
//! `Ordering::Relaxed`: a store becomes visible to executing threads
//! eventually and never partially. Callers needing a happens-before edge with
//! other state must provide it themselves.

use crate::asm::{InstalledCode, RelocKind};
use std::sync::atomic::{AtomicU32, Ordering};

/// One guard word inside installed code
#[derive(Debug, Clone, Copy)]
pub struct GuardCell<'a> {
    word: &'a AtomicU32,
    address: u64,
}

impl<'a> GuardCell<'a> {
    /// Absolute address of the guard word
    pub fn address(&self) -> u64 {
        self.address
    }

    #[inline]
    pub fn load(&self) -> u32 {
        self.word.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn store(&self, value: u32) {
        self.word.store(value, Ordering::Relaxed);
    }
}

/// Finds and flips the entry guards of one installed code blob
pub struct EntryGuardPatcher<'a> {
    code: &'a InstalledCode,
}

impl<'a> EntryGuardPatcher<'a> {
    pub fn new(code: &'a InstalledCode) -> Self {
        Self { code }
    }

    /// All guard words tagged with an entry-guard relocation
    pub fn guards(&self) -> impl Iterator<Item = GuardCell<'a>> + 'a {
        let code = self.code;
        code.relocations()
            .iter()
            .filter(|reloc| reloc.kind == RelocKind::EntryGuard)
            .filter_map(move |reloc| {
                let word = code.word_at(reloc.offset);
                debug_assert!(word.is_some(), "entry guard at {:#x} is not word aligned", reloc.offset);
                word.map(|word| GuardCell {
                    word,
                    address: code.code_start() + reloc.offset as u64,
                })
            })
    }

    /// Store `value` into every guard, returning how many were written
    pub fn arm_all(&self, value: u32) -> usize {
        let mut count = 0;
        for guard in self.guards() {
            guard.store(value);
            count += 1;
        }
        tracing::trace!(count, value, "entry guards updated");
        count
    }
}
