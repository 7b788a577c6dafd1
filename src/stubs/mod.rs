//! Out-of-line code stubs
//!
//! While a compilation unit is lowered, the code generator registers one stub
//! per safepoint poll site and per entry barrier in a [`StubCatalog`]. After
//! the main body is emitted, the catalog appends every stub to the same
//! buffer.
//!
//! Each stub declares a worst-case byte size up front. The real length depends
//! on relocation distances only known at layout time, so callers pre-size the
//! buffer from [`StubCatalog::max_size`] and the catalog verifies every
//! emitted stub against its declaration. Exceeding a declaration means the
//! buffer sizing was wrong and neighbouring code could be overwritten, so it
//! aborts instead of returning an error.

pub mod entry_barrier;
pub mod guard;
pub mod safepoint_poll;

pub use entry_barrier::{EntryBarrierStub, GUARD_DISARMED};
pub use guard::{EntryGuardPatcher, GuardCell};
pub use safepoint_poll::SafepointPollStub;

use crate::asm::{AsmResult, Label, MacroAssembler};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::fmt;

/// Stub flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StubKind {
    SafepointPoll,
    EntryBarrier,
}

impl fmt::Display for StubKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StubKind::SafepointPoll => write!(f, "safepoint poll"),
            StubKind::EntryBarrier => write!(f, "entry barrier"),
        }
    }
}

/// A size-bounded out-of-line code sequence
pub trait CodeStub {
    fn kind(&self) -> StubKind;

    /// Upper bound on emitted bytes, valid for any relocation distance
    fn max_size(&self) -> usize;

    /// Label the main code branches to
    fn entry(&self) -> Label;

    /// Emit the stub at the assembler's current position
    fn emit<M: MacroAssembler>(&self, masm: &mut M) -> AsmResult<()>;
}

/// Addresses of the runtime routines stubs transfer into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RuntimeStubs {
    /// Handler reached from safepoint poll stubs
    pub polling_page_return_handler: u64,
    /// Shared routine that evaluates entry guards
    pub method_entry_barrier: u64,
    /// Offset of the saved-exception-pc slot from the thread register
    pub saved_exception_pc_offset: i32,
}

static RUNTIME_STUBS: OnceCell<RuntimeStubs> = OnceCell::new();

impl RuntimeStubs {
    /// Publish the process-wide runtime addresses. Returns `false` if they
    /// were already registered.
    pub fn register(self) -> bool {
        let registered = RUNTIME_STUBS.set(self).is_ok();
        if !registered {
            tracing::warn!("runtime stub addresses already registered, keeping the first set");
        }
        registered
    }

    /// The registered runtime addresses, if any
    pub fn registered() -> Option<&'static RuntimeStubs> {
        RUNTIME_STUBS.get()
    }
}

/// A pending stub of either kind
#[derive(Debug, Clone)]
pub enum Stub {
    SafepointPoll(SafepointPollStub),
    EntryBarrier(EntryBarrierStub),
}

impl CodeStub for Stub {
    fn kind(&self) -> StubKind {
        match self {
            Stub::SafepointPoll(stub) => stub.kind(),
            Stub::EntryBarrier(stub) => stub.kind(),
        }
    }

    fn max_size(&self) -> usize {
        match self {
            Stub::SafepointPoll(stub) => stub.max_size(),
            Stub::EntryBarrier(stub) => stub.max_size(),
        }
    }

    fn entry(&self) -> Label {
        match self {
            Stub::SafepointPoll(stub) => stub.entry(),
            Stub::EntryBarrier(stub) => stub.entry(),
        }
    }

    fn emit<M: MacroAssembler>(&self, masm: &mut M) -> AsmResult<()> {
        match self {
            Stub::SafepointPoll(stub) => stub.emit(masm),
            Stub::EntryBarrier(stub) => stub.emit(masm),
        }
    }
}

/// Where a stub ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmittedStub {
    pub kind: StubKind,
    pub offset: usize,
    pub size: usize,
    pub max_size: usize,
}

/// Stubs collected for one compilation unit
#[derive(Debug)]
pub struct StubCatalog {
    runtime: RuntimeStubs,
    stubs: Vec<Stub>,
}

impl StubCatalog {
    pub fn new(runtime: RuntimeStubs) -> Self {
        Self {
            runtime,
            stubs: Vec::new(),
        }
    }

    /// A catalog using the process-wide registered runtime addresses
    pub fn with_registered() -> Option<Self> {
        RuntimeStubs::registered().map(|runtime| Self::new(*runtime))
    }

    /// Register a safepoint poll stub for the poll at `safepoint_offset`,
    /// returning the label the poll branches to.
    pub fn add_safepoint_poll<M: MacroAssembler>(&mut self, masm: &mut M, safepoint_offset: usize) -> Label {
        let stub = SafepointPollStub::new(masm, safepoint_offset, &self.runtime);
        let entry = stub.entry();
        self.stubs.push(Stub::SafepointPoll(stub));
        entry
    }

    /// Register an entry barrier stub resuming at `continuation`, returning
    /// a copy that carries its entry and guard labels.
    pub fn add_entry_barrier<M: MacroAssembler>(&mut self, masm: &mut M, continuation: Label) -> EntryBarrierStub {
        let stub = EntryBarrierStub::new(masm, continuation, &self.runtime);
        self.stubs.push(Stub::EntryBarrier(stub.clone()));
        stub
    }

    pub fn len(&self) -> usize {
        self.stubs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stubs.is_empty()
    }

    pub fn stubs(&self) -> &[Stub] {
        &self.stubs
    }

    /// Bytes to reserve for all registered stubs
    pub fn max_size(&self) -> usize {
        self.stubs.iter().map(CodeStub::max_size).sum()
    }

    /// Emit every stub in registration order, consuming the catalog.
    ///
    /// # Panics
    ///
    /// If a stub emits more bytes than its declared maximum.
    pub fn emit_all<M: MacroAssembler>(self, masm: &mut M) -> AsmResult<Vec<EmittedStub>> {
        self.stubs.iter().map(|stub| emit_checked(stub, masm)).collect()
    }
}

/// Emit one stub and verify it stayed within its declared size.
///
/// # Panics
///
/// If the stub emits more bytes than [`CodeStub::max_size`].
pub fn emit_checked<S: CodeStub, M: MacroAssembler>(stub: &S, masm: &mut M) -> AsmResult<EmittedStub> {
    let offset = masm.offset();
    stub.emit(masm)?;
    let size = masm.offset() - offset;
    let max_size = stub.max_size();
    if size > max_size {
        panic!(
            "{} stub at offset {:#x} emitted {} bytes, exceeding its {} byte budget",
            stub.kind(),
            offset,
            size,
            max_size
        );
    }
    tracing::debug!(kind = %stub.kind(), offset, size, max_size, "emitted stub");
    Ok(EmittedStub {
        kind: stub.kind(),
        offset,
        size,
        max_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::{AsmError, CodeBuffer, NOP};

    fn runtime() -> RuntimeStubs {
        RuntimeStubs {
            polling_page_return_handler: 0x7000_0000_0000,
            method_entry_barrier: 0x7000_0000_1000,
            saved_exception_pc_offset: 0x1a8,
        }
    }

    /// Emits more than it declares
    struct Oversized(Label);

    impl CodeStub for Oversized {
        fn kind(&self) -> StubKind {
            StubKind::SafepointPoll
        }
        fn max_size(&self) -> usize {
            4
        }
        fn entry(&self) -> Label {
            self.0
        }
        fn emit<M: MacroAssembler>(&self, masm: &mut M) -> AsmResult<()> {
            masm.bind(self.0)?;
            masm.emit_u32(NOP);
            masm.emit_u32(NOP);
            Ok(())
        }
    }

    #[test]
    fn test_catalog_sizes() {
        let mut masm = CodeBuffer::new(0x1000);
        let body = masm.new_label();
        let mut catalog = StubCatalog::new(runtime());
        catalog.add_entry_barrier(&mut masm, body);
        catalog.add_safepoint_poll(&mut masm, 0);
        catalog.add_safepoint_poll(&mut masm, 4);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.max_size(), 36 + 52 + 52);
    }

    #[test]
    fn test_added_entry_barrier_matches_catalog() {
        let mut masm = CodeBuffer::new(0x1000);
        let body = masm.new_label();
        let mut catalog = StubCatalog::new(runtime());
        let added = catalog.add_entry_barrier(&mut masm, body);
        match catalog.stubs() {
            [Stub::EntryBarrier(stored)] => {
                assert_eq!(stored.entry(), added.entry());
                assert_eq!(stored.guard(), added.guard());
                assert_eq!(stored.continuation(), body);
            }
            other => panic!("unexpected catalog contents: {:?}", other),
        }
    }

    #[test]
    fn test_emit_all_in_order() {
        let mut masm = CodeBuffer::new(0x1000);
        let body = masm.new_label();
        masm.bind(body).unwrap();
        masm.emit_u32(NOP);
        masm.emit_u32(NOP);

        let mut catalog = StubCatalog::new(runtime());
        let guard = catalog.add_entry_barrier(&mut masm, body).guard();
        let poll_entry = catalog.add_safepoint_poll(&mut masm, 4);
        masm.reserve(catalog.max_size());

        let emitted = catalog.emit_all(&mut masm).unwrap();
        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].kind, StubKind::EntryBarrier);
        assert_eq!(emitted[0].offset, 8);
        assert_eq!(emitted[1].offset, emitted[0].offset + emitted[0].size);
        assert_eq!(masm.label_offset(poll_entry), Some(emitted[1].offset));
        assert!(masm.label_offset(guard).is_some());
        for stub in &emitted {
            assert!(stub.size <= stub.max_size);
        }
    }

    #[test]
    fn test_emit_error_propagates() {
        let mut masm = CodeBuffer::new(0x1000);
        let mut catalog = StubCatalog::new(RuntimeStubs {
            method_entry_barrier: 1 << 48,
            ..runtime()
        });
        let body = masm.new_label();
        catalog.add_entry_barrier(&mut masm, body);
        assert_eq!(
            catalog.emit_all(&mut masm).unwrap_err(),
            AsmError::AddressOutOfRange(1 << 48)
        );
    }

    #[test]
    #[should_panic(expected = "safepoint poll stub at offset 0x0 emitted 8 bytes, exceeding its 4 byte budget")]
    fn test_budget_violation_is_fatal() {
        let mut masm = CodeBuffer::new(0x1000);
        let stub = Oversized(masm.new_label());
        let _ = emit_checked(&stub, &mut masm);
    }
}
