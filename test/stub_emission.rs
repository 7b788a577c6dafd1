//! Stub Emission Integration Tests
//!
//! Emits stubs through the public API across the whole range of relocation
//! distances and checks the size budget, guard alignment and guard patching.

use proptest::prelude::*;
use rv64_backend::asm::{CodeBuffer, MacroAssembler, RelocKind, C_NOP, NOP};
use rv64_backend::stubs::{
    CodeStub, EntryBarrierStub, EntryGuardPatcher, RuntimeStubs, SafepointPollStub, StubCatalog,
    StubKind, GUARD_DISARMED,
};

/// movptr only reaches below 2^47
const ADDRESS_LIMIT: u64 = 1 << 47;

fn runtime(handler: u64, barrier: u64) -> RuntimeStubs {
    RuntimeStubs {
        polling_page_return_handler: handler,
        method_entry_barrier: barrier,
        saved_exception_pc_offset: 0x1a8,
    }
}

fn opcode(word: u32) -> u32 {
    word & 0x7f
}

// ============================================================================
// Safepoint Poll Stub
// ============================================================================

#[test]
fn test_far_handler_uses_long_path() {
    let base = 0x4000_0000;
    let handler = base + (1 << 40);
    let mut masm = CodeBuffer::new(base);
    masm.emit_u32(NOP);
    let stub = SafepointPollStub::new(&mut masm, 0, &runtime(handler, 0x5000));
    let start = masm.offset();
    stub.emit(&mut masm).unwrap();
    let size = masm.offset() - start;

    assert!(size <= stub.max_size());
    assert_eq!(size, 9 * 4);
    // auipc for the poll pc, lui starting movptr for the handler
    assert_eq!(opcode(masm.read_u32(start).unwrap()), 0x17);
    assert_eq!(opcode(masm.read_u32(start + 12).unwrap()), 0x37);
    assert_eq!(opcode(masm.read_u32(start + 32).unwrap()), 0x67);

    let call = masm
        .relocations()
        .iter()
        .find(|r| matches!(r.kind, RelocKind::RuntimeCall { .. }))
        .unwrap();
    assert_eq!(call.offset, start + 12);
    assert_eq!(call.kind, RelocKind::RuntimeCall { target: handler });
}

#[test]
fn test_near_handler_uses_short_path() {
    let base = 0x4000_0000;
    let mut masm = CodeBuffer::new(base);
    let stub = SafepointPollStub::new(&mut masm, 0, &runtime(base + 0x10_0000, 0x5000));
    stub.emit(&mut masm).unwrap();
    assert_eq!(masm.offset(), 5 * 4);
    assert_eq!(opcode(masm.read_u32(12).unwrap()), 0x17);
}

proptest! {
    #[test]
    fn prop_safepoint_poll_within_budget(
        base in (0u64..ADDRESS_LIMIT / 4).prop_map(|b| b * 4),
        handler in 0u64..ADDRESS_LIMIT,
        prefix in 0usize..64,
    ) {
        let mut masm = CodeBuffer::new(base);
        for _ in 0..prefix {
            masm.emit_u32(NOP);
        }
        let stub = SafepointPollStub::new(&mut masm, prefix * 4, &runtime(handler, 0x5000));
        let start = masm.offset();
        stub.emit(&mut masm).unwrap();
        prop_assert!(masm.offset() - start <= stub.max_size());
    }

    #[test]
    fn prop_entry_barrier_within_budget(
        base in (0u64..ADDRESS_LIMIT / 2).prop_map(|b| b * 2),
        barrier in 0u64..ADDRESS_LIMIT,
        halfwords in 0usize..8,
    ) {
        let mut masm = CodeBuffer::new(base);
        let body = masm.new_label();
        masm.bind(body).unwrap();
        for _ in 0..halfwords {
            masm.emit_u16(C_NOP);
        }
        let stub = EntryBarrierStub::new(&mut masm, body, &runtime(0x5000, barrier));
        let start = masm.offset();
        stub.emit(&mut masm).unwrap();

        prop_assert!(masm.offset() - start <= stub.max_size());
        let guard = masm.label_offset(stub.guard()).unwrap();
        prop_assert_eq!((base + guard as u64) % 4, 0);
        prop_assert_eq!(masm.read_u32(guard), Some(GUARD_DISARMED));
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[test]
fn test_catalog_many_sites() {
    let base = 0x10_0000;
    let mut masm = CodeBuffer::new(base);
    let body = masm.new_label();
    let mut catalog = StubCatalog::new(runtime(base + (1 << 36), base + (1 << 36) + 0x40));
    catalog.add_entry_barrier(&mut masm, body);

    masm.bind(body).unwrap();
    let mut entries = Vec::new();
    for _ in 0..16 {
        let site = masm.offset();
        masm.emit_u32(NOP);
        entries.push(catalog.add_safepoint_poll(&mut masm, site));
    }

    let reserved = catalog.max_size();
    let body_end = masm.offset();
    masm.reserve(reserved);
    let emitted = catalog.emit_all(&mut masm).unwrap();

    assert_eq!(emitted.len(), 17);
    assert_eq!(emitted[0].kind, StubKind::EntryBarrier);
    assert!(emitted[1..].iter().all(|s| s.kind == StubKind::SafepointPoll));
    assert!(masm.offset() - body_end <= reserved);
    for (entry, stub) in entries.iter().zip(&emitted[1..]) {
        assert_eq!(masm.label_offset(*entry), Some(stub.offset));
    }

    let code = masm.finish().unwrap();
    let internal: Vec<u64> = code
        .relocations()
        .iter()
        .filter_map(|r| match r.kind {
            RelocKind::InternalWord { target } => Some(target),
            _ => None,
        })
        .collect();
    let expected: Vec<u64> = (0..16).map(|i| base + 4 * i).collect();
    assert_eq!(internal, expected);
}

#[test]
fn test_catalog_from_registered_runtime() {
    // Only this test registers in this binary
    assert!(RuntimeStubs::registered().is_none());
    assert!(StubCatalog::with_registered().is_none());
    assert!(runtime(0x1000, 0x2000).register());
    assert!(!runtime(0x3000, 0x4000).register());
    let catalog = StubCatalog::with_registered().unwrap();
    assert!(catalog.is_empty());
    assert_eq!(RuntimeStubs::registered().unwrap().polling_page_return_handler, 0x1000);
}

// ============================================================================
// Guard Patching
// ============================================================================

#[test]
fn test_concurrent_guard_updates_never_tear() {
    const ARMED: u32 = 0xdead_beef;
    const OTHER: u32 = 0x1234_5678;

    let mut masm = CodeBuffer::new(0x8000);
    let body = masm.new_label();
    masm.bind(body).unwrap();
    masm.emit_u16(C_NOP);
    let stub = EntryBarrierStub::new(&mut masm, body, &runtime(0x5000, 0x6000));
    stub.emit(&mut masm).unwrap();
    let code = masm.finish().unwrap();

    crossbeam::scope(|s| {
        s.spawn(|_| {
            let patcher = EntryGuardPatcher::new(&code);
            for i in 0..10_000 {
                patcher.arm_all(if i % 2 == 0 { ARMED } else { OTHER });
            }
            patcher.arm_all(GUARD_DISARMED);
        });
        for _ in 0..3 {
            s.spawn(|_| {
                let guard = EntryGuardPatcher::new(&code).guards().next().unwrap();
                for _ in 0..10_000 {
                    let seen = guard.load();
                    assert!(
                        seen == GUARD_DISARMED || seen == ARMED || seen == OTHER,
                        "torn guard value {:#x}",
                        seen
                    );
                }
            });
        }
    })
    .unwrap();

    let guard = EntryGuardPatcher::new(&code).guards().next().unwrap();
    assert_eq!(guard.load(), GUARD_DISARMED);
    assert_eq!(guard.address() % 4, 0);
}

#[test]
fn test_guard_visible_in_installed_bytes() {
    let mut masm = CodeBuffer::new(0x8000);
    let body = masm.new_label();
    masm.bind(body).unwrap();
    let stub = EntryBarrierStub::new(&mut masm, body, &runtime(0x5000, 0x6000));
    stub.emit(&mut masm).unwrap();
    let guard_offset = masm.label_offset(stub.guard()).unwrap();
    let code = masm.finish().unwrap();

    EntryGuardPatcher::new(&code).arm_all(0x0102_0304);
    let bytes = code.to_bytes();
    assert_eq!(&bytes[guard_offset..guard_offset + 4], &0x0102_0304u32.to_le_bytes());
}
