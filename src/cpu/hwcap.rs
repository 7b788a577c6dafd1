//! `AT_HWCAP` single-letter bits

use super::extension::{ExtId, ExtensionKind, REGISTRY};
use super::snapshot::CapabilityBuilder;

#[cfg(all(target_os = "linux", target_arch = "riscv64", target_env = "gnu"))]
mod kernel {
    pub const HWCAP_ISA_I: u64 = libc::COMPAT_HWCAP_ISA_I as u64;
    pub const HWCAP_ISA_M: u64 = libc::COMPAT_HWCAP_ISA_M as u64;
    pub const HWCAP_ISA_A: u64 = libc::COMPAT_HWCAP_ISA_A as u64;
    pub const HWCAP_ISA_F: u64 = libc::COMPAT_HWCAP_ISA_F as u64;
    pub const HWCAP_ISA_D: u64 = libc::COMPAT_HWCAP_ISA_D as u64;
    pub const HWCAP_ISA_C: u64 = libc::COMPAT_HWCAP_ISA_C as u64;
    pub const HWCAP_ISA_V: u64 = libc::COMPAT_HWCAP_ISA_V as u64;
}

// Bit positions from the kernel's asm/hwcap.h
#[cfg(not(all(target_os = "linux", target_arch = "riscv64", target_env = "gnu")))]
mod kernel {
    pub const HWCAP_ISA_I: u64 = 1 << 8;
    pub const HWCAP_ISA_M: u64 = 1 << 12;
    pub const HWCAP_ISA_A: u64 = 1 << 0;
    pub const HWCAP_ISA_F: u64 = 1 << 5;
    pub const HWCAP_ISA_D: u64 = 1 << 3;
    pub const HWCAP_ISA_C: u64 = 1 << 2;
    pub const HWCAP_ISA_V: u64 = 1 << 21;
}

pub use kernel::{
    HWCAP_ISA_A, HWCAP_ISA_C, HWCAP_ISA_D, HWCAP_ISA_F, HWCAP_ISA_I, HWCAP_ISA_M, HWCAP_ISA_V,
};

// libc does not export these two
pub const HWCAP_ISA_Q: u64 = 1 << 16;
pub const HWCAP_ISA_H: u64 = 1 << 7;

const KERNEL_BITS: [(ExtId, u64); 9] = [
    (ExtId::I, HWCAP_ISA_I),
    (ExtId::M, HWCAP_ISA_M),
    (ExtId::A, HWCAP_ISA_A),
    (ExtId::F, HWCAP_ISA_F),
    (ExtId::D, HWCAP_ISA_D),
    (ExtId::C, HWCAP_ISA_C),
    (ExtId::Q, HWCAP_ISA_Q),
    (ExtId::H, HWCAP_ISA_H),
    (ExtId::V, HWCAP_ISA_V),
];

/// Registry entries whose bit disagrees with the kernel's HWCAP assignment
pub fn kernel_abi_mismatches() -> Vec<ExtId> {
    KERNEL_BITS
        .iter()
        .filter(|(id, bit)| id.info().bit != *bit)
        .map(|(id, _)| *id)
        .collect()
}

/// Registry bits must match the kernel's HWCAP assignment
pub fn check_kernel_abi() {
    debug_assert!(
        kernel_abi_mismatches().is_empty(),
        "bits for {:?} must follow Linux HWCAP",
        kernel_abi_mismatches()
    );
}

/// Enable every single-letter extension whose bit is set in `hwcap`
pub fn apply(hwcap: u64, caps: &mut CapabilityBuilder) {
    REGISTRY
        .iter()
        .filter(|info| info.kind == ExtensionKind::SingleLetter && info.bit & hwcap != 0)
        .for_each(|info| caps.enable(info.id));
}
