//! Vendor capability overlays
//!
//! Some parts implement more than the kernel reports. When the machine vendor
//! id matches an entry here, its bundle is force-enabled on top of whatever
//! the earlier stages found. Overlays only ever add extensions; value entries
//! (misaligned class, translation mode) are overwritten.

use super::extension::ExtId;
use super::snapshot::CapabilityBuilder;
use super::tunables::{MisalignedAccess, SatpMode};

/// Encode a JEDEC manufacturer id as `mvendorid`: `((bank - 1) << 7) | id`
pub const fn jedec_vendor_id(bank: u64, id: u64) -> u64 {
    ((bank - 1) << 7) | (id & 0x7f)
}

/// Rivos Inc.: JEDEC bank 14, id 0x4f
pub const RIVOS_MVENDORID: u64 = jedec_vendor_id(14, 0x4f);

#[derive(Debug)]
pub struct VendorOverlay {
    pub name: &'static str,
    pub mvendorid: u64,
    pub extensions: &'static [ExtId],
    pub unaligned_access: Option<MisalignedAccess>,
    pub translation_mode: Option<SatpMode>,
}

pub static VENDOR_OVERLAYS: &[VendorOverlay] = &[VendorOverlay {
    name: "rivos",
    mvendorid: RIVOS_MVENDORID,
    extensions: &[
        ExtId::I,
        ExtId::M,
        ExtId::A,
        ExtId::F,
        ExtId::D,
        ExtId::C,
        ExtId::Q,
        ExtId::H,
        ExtId::V,
        ExtId::Zicbom,
        ExtId::Zicboz,
        ExtId::Zicbop,
        ExtId::Zba,
        ExtId::Zbb,
        ExtId::Zbc,
        ExtId::Zbs,
        ExtId::Zicsr,
        ExtId::Zifencei,
        ExtId::Zic64b,
        ExtId::Zihintpause,
    ],
    unaligned_access: Some(MisalignedAccess::Fast),
    translation_mode: Some(SatpMode::Sv48),
}];

pub fn find(mvendorid: u64) -> Option<&'static VendorOverlay> {
    VENDOR_OVERLAYS.iter().find(|overlay| overlay.mvendorid == mvendorid)
}

/// Apply the overlay matching the detected vendor id, if any
pub fn apply(caps: &mut CapabilityBuilder) -> Option<&'static VendorOverlay> {
    let overlay = find(caps.value(ExtId::VendorId)?)?;
    for &id in overlay.extensions {
        caps.enable(id);
    }
    if let Some(class) = overlay.unaligned_access {
        caps.set_unaligned_access(class);
    }
    if let Some(mode) = overlay.translation_mode {
        caps.set_translation_mode(mode);
    }
    tracing::debug!(vendor = overlay.name, "applied vendor capability overlay");
    Some(overlay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rivos_vendor_id() {
        assert_eq!(RIVOS_MVENDORID, 0x6cf);
    }

    #[test]
    fn test_no_vendor_id() {
        let mut caps = CapabilityBuilder::new();
        caps.enable(ExtId::I);
        assert!(apply(&mut caps).is_none());
        assert_eq!(caps.enabled().len(), 1);
    }

    #[test]
    fn test_unknown_vendor() {
        let mut caps = CapabilityBuilder::new();
        caps.enable_with_value(ExtId::VendorId, 0x489);
        assert!(apply(&mut caps).is_none());
        assert!(!caps.is_enabled(ExtId::V));
    }

    #[test]
    fn test_rivos_bundle() {
        let mut caps = CapabilityBuilder::new();
        caps.enable_with_value(ExtId::VendorId, RIVOS_MVENDORID);
        caps.enable(ExtId::Ztso);
        caps.set_translation_mode(SatpMode::Sv39);

        let overlay = apply(&mut caps).unwrap();
        assert_eq!(overlay.name, "rivos");
        for &id in overlay.extensions {
            assert!(caps.is_enabled(id), "{} not enabled", id.name());
        }
        assert!(caps.is_enabled(ExtId::Ztso));
        assert!(!caps.is_enabled(ExtId::Zfh));
        assert_eq!(caps.value(ExtId::Satp), Some(SatpMode::Sv48 as u64));
        assert_eq!(caps.value(ExtId::Unaligned), Some(MisalignedAccess::Fast as u64));
    }
}
