//! riscv_hwprobe key/value interpretation
//!
//! Key and bit numbering follow the Linux `asm/hwprobe.h` ABI.

use super::extension::ExtId;
use super::snapshot::CapabilityBuilder;
use super::source::HwProbePair;
use super::tunables::MisalignedAccess;

pub const KEY_MVENDORID: i64 = 0;
pub const KEY_MARCHID: i64 = 1;
pub const KEY_MIMPID: i64 = 2;
pub const KEY_BASE_BEHAVIOR: i64 = 3;
pub const KEY_IMA_EXT_0: i64 = 4;
pub const KEY_CPUPERF_0: i64 = 5;

/// Written into `key` by the kernel for keys it does not recognize
pub const KEY_UNKNOWN: i64 = -1;

pub const BASE_BEHAVIOR_IMA: u64 = 1 << 0;

pub const IMA_FD: u64 = 1 << 0;
pub const IMA_C: u64 = 1 << 1;
pub const IMA_V: u64 = 1 << 2;
pub const EXT_ZBA: u64 = 1 << 3;
pub const EXT_ZBB: u64 = 1 << 4;
pub const EXT_ZBS: u64 = 1 << 5;
pub const EXT_ZICBOZ: u64 = 1 << 6;
pub const EXT_ZBC: u64 = 1 << 7;
pub const EXT_ZFH: u64 = 1 << 27;
pub const EXT_ZVFH: u64 = 1 << 30;
pub const EXT_ZTSO: u64 = 1 << 33;
pub const EXT_ZACAS: u64 = 1 << 34;
pub const EXT_ZIHINTPAUSE: u64 = 1 << 36;

pub const MISALIGNED_MASK: u64 = 7;

/// Keys requested from the kernel
pub const PROBE_KEYS: [i64; 6] = [
    KEY_MVENDORID,
    KEY_MARCHID,
    KEY_MIMPID,
    KEY_BASE_BEHAVIOR,
    KEY_IMA_EXT_0,
    KEY_CPUPERF_0,
];

/// `IMA_EXT_0` bits and the extensions they enable. FD enables two.
const IMA_EXT_0_MAP: [(u64, &[ExtId]); 13] = [
    (IMA_FD, &[ExtId::F, ExtId::D]),
    (IMA_C, &[ExtId::C]),
    (IMA_V, &[ExtId::V]),
    (EXT_ZBA, &[ExtId::Zba]),
    (EXT_ZBB, &[ExtId::Zbb]),
    (EXT_ZBS, &[ExtId::Zbs]),
    (EXT_ZICBOZ, &[ExtId::Zicboz]),
    (EXT_ZBC, &[ExtId::Zbc]),
    (EXT_ZFH, &[ExtId::Zfh]),
    (EXT_ZVFH, &[ExtId::Zvfh]),
    (EXT_ZTSO, &[ExtId::Ztso]),
    (EXT_ZACAS, &[ExtId::Zacas]),
    (EXT_ZIHINTPAUSE, &[ExtId::Zihintpause]),
];

/// Fold answered pairs into `caps`. Unknown keys are skipped.
pub fn apply(pairs: &[HwProbePair], caps: &mut CapabilityBuilder) {
    for pair in pairs {
        match pair.key {
            KEY_UNKNOWN => {}
            KEY_MVENDORID => caps.enable_with_value(ExtId::VendorId, pair.value),
            KEY_MARCHID => caps.enable_with_value(ExtId::ArchId, pair.value),
            KEY_MIMPID => caps.enable_with_value(ExtId::ImpId, pair.value),
            KEY_BASE_BEHAVIOR => {
                if pair.value & BASE_BEHAVIOR_IMA != 0 {
                    caps.enable(ExtId::I);
                    caps.enable(ExtId::M);
                    caps.enable(ExtId::A);
                }
            }
            KEY_IMA_EXT_0 => {
                for (bit, ids) in IMA_EXT_0_MAP {
                    if pair.value & bit != 0 {
                        ids.iter().for_each(|&id| caps.enable(id));
                    }
                }
            }
            KEY_CPUPERF_0 => {
                let class = MisalignedAccess::from_value((pair.value & MISALIGNED_MASK) as i64);
                caps.set_unaligned_access(class);
            }
            other => tracing::trace!(key = other, "ignoring unexpected hwprobe key"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_and_base_behavior() {
        let mut caps = CapabilityBuilder::new();
        apply(
            &[
                HwProbePair::new(KEY_MVENDORID, 0x489),
                HwProbePair::new(KEY_MARCHID, 0x8000_0000_0000_0007),
                HwProbePair::new(KEY_BASE_BEHAVIOR, BASE_BEHAVIOR_IMA),
            ],
            &mut caps,
        );
        assert_eq!(caps.value(ExtId::VendorId), Some(0x489));
        assert_eq!(caps.value(ExtId::ArchId), Some(0x8000_0000_0000_0007));
        assert!(!caps.is_enabled(ExtId::ImpId));
        for id in [ExtId::I, ExtId::M, ExtId::A] {
            assert!(caps.is_enabled(id));
        }
    }

    #[test]
    fn test_ima_ext_0_bits() {
        let mut caps = CapabilityBuilder::new();
        apply(
            &[HwProbePair::new(KEY_IMA_EXT_0, IMA_FD | IMA_C | EXT_ZBA | EXT_ZTSO | EXT_ZIHINTPAUSE)],
            &mut caps,
        );
        let enabled: Vec<ExtId> = caps.enabled().iter().collect();
        assert_eq!(
            enabled,
            vec![ExtId::F, ExtId::D, ExtId::C, ExtId::Zihintpause, ExtId::Zba, ExtId::Ztso]
        );
    }

    #[test]
    fn test_unknown_key_ignored() {
        let mut caps = CapabilityBuilder::new();
        apply(&[HwProbePair::new(KEY_UNKNOWN, u64::MAX)], &mut caps);
        assert!(caps.enabled().is_empty());
    }

    #[test]
    fn test_misaligned_class_masked() {
        let mut caps = CapabilityBuilder::new();
        apply(&[HwProbePair::new(KEY_CPUPERF_0, 0xf0 | 3)], &mut caps);
        assert_eq!(caps.value(ExtId::Unaligned), Some(MisalignedAccess::Fast as u64));
    }
}
