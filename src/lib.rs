//! rv64-backend - RISC-V 64 JIT back-end support
//!
//! Two pieces of a RISC-V code generator that sit below instruction selection:
//!
//! - **Out-of-line stubs**: the safepoint poll stub and the method entry
//!   barrier stub, emitted after the main body with worst-case size
//!   accounting and a 4-byte aligned, atomically patchable entry guard.
//! - **CPU capabilities**: one-shot detection from hwprobe, `AT_HWCAP`,
//!   `/proc/cpuinfo` and vendor overlays, rendered into a canonical feature
//!   string and synced into code generation tunables.
//!
//! # Example
//!
//! ```rust
//! use rv64_backend::asm::{CodeBuffer, MacroAssembler, NOP};
//! use rv64_backend::stubs::{EntryGuardPatcher, RuntimeStubs, StubCatalog};
//!
//! let runtime = RuntimeStubs {
//!     polling_page_return_handler: 0x4000_2000,
//!     method_entry_barrier: 0x4000_3000,
//!     saved_exception_pc_offset: 0x1a8,
//! };
//!
//! let mut masm = CodeBuffer::new(0x4000_0000);
//! let body = masm.new_label();
//! let mut catalog = StubCatalog::new(runtime);
//! catalog.add_entry_barrier(&mut masm, body);
//!
//! masm.bind(body).unwrap();
//! let poll_site = masm.offset();
//! masm.emit_u32(NOP);
//! catalog.add_safepoint_poll(&mut masm, poll_site);
//!
//! masm.reserve(catalog.max_size());
//! let emitted = catalog.emit_all(&mut masm).unwrap();
//! assert!(emitted.iter().all(|stub| stub.size <= stub.max_size));
//!
//! let code = masm.finish().unwrap();
//! assert_eq!(EntryGuardPatcher::new(&code).arm_all(1), 1);
//! ```
//!
//! ```rust
//! use rv64_backend::cpu::{self, FixedSource, HwProbePair};
//!
//! let source = FixedSource::new()
//!     .with_hwprobe(vec![HwProbePair::new(3, 1), HwProbePair::new(4, 0b11)])
//!     .with_cpuinfo("mmu\t: sv39\n");
//! let snapshot = cpu::detect(&source);
//! assert_eq!(snapshot.features_string, "rv64imafdc");
//! assert!(snapshot.tunables.use_rvc);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐        ┌──────────────────────┐
//! │ PlatformSource   │        │ code generator       │
//! │ hwprobe / hwcap  │        │ (safepoints, entry)  │
//! │ cpuinfo / vlenb  │        └──────────┬───────────┘
//! └────────┬─────────┘                   │ add_*
//!          │ detect (once)               ▼
//!          ▼                   ┌──────────────────────┐
//! ┌──────────────────┐         │ StubCatalog          │
//! │ CapabilitySnap-  │         │ emit_all (budgeted)  │
//! │ shot + Tunables  │         └──────────┬───────────┘
//! └──────────────────┘                    │ MacroAssembler
//!                                         ▼
//!                              ┌──────────────────────┐
//!                              │ CodeBuffer           │
//!                              │  └► InstalledCode    │
//!                              │      guard patching  │
//!                              └──────────────────────┘
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod asm;
pub mod config;
pub mod cpu;
pub mod stubs;

// Re-export commonly used types
pub use asm::{AsmError, AsmResult, CodeBuffer, InstalledCode, Label, MacroAssembler, Register};
pub use config::{BackendConfig, ConfigError, ConfigResult};
pub use cpu::{CapabilitySnapshot, ExtId, FixedSource, LinuxSource, PlatformSource, Tunables};
pub use stubs::{
    CodeStub, EmittedStub, EntryBarrierStub, EntryGuardPatcher, RuntimeStubs, SafepointPollStub,
    StubCatalog, StubKind,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
