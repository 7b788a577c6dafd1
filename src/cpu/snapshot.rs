//! Capability builder and frozen snapshot

use super::extension::{ExtId, ExtensionKind, ExtensionSet, EXTENSION_COUNT};
use super::feature_string::render_feature_string;
use super::tunables::{MisalignedAccess, SatpMode, Tunables};
use crate::config::TunableOverrides;
use serde::Serialize;

/// Mutable capability state, filled in by the detection stages
#[derive(Debug, Clone, Default)]
pub struct CapabilityBuilder {
    enabled: ExtensionSet,
    values: [Option<u64>; EXTENSION_COUNT],
    uarch: Option<String>,
}

impl CapabilityBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&mut self, id: ExtId) {
        self.enabled.insert(id);
    }

    /// Enable `id` and record its value, replacing any earlier one
    pub fn enable_with_value(&mut self, id: ExtId, value: u64) {
        self.enabled.insert(id);
        self.values[id.index()] = Some(value);
    }

    pub fn is_enabled(&self, id: ExtId) -> bool {
        self.enabled.contains(id)
    }

    pub fn value(&self, id: ExtId) -> Option<u64> {
        self.values[id.index()]
    }

    pub fn enabled(&self) -> ExtensionSet {
        self.enabled
    }

    pub fn set_translation_mode(&mut self, mode: SatpMode) {
        self.enable_with_value(ExtId::Satp, mode as u64);
    }

    pub fn set_unaligned_access(&mut self, class: MisalignedAccess) {
        self.enable_with_value(ExtId::Unaligned, class as u64);
    }

    pub fn set_uarch(&mut self, uarch: String) {
        self.uarch = Some(uarch);
    }

    pub fn uarch(&self) -> Option<&str> {
        self.uarch.as_deref()
    }

    /// Freeze into a snapshot: build the mask and feature string, and default
    /// on the tunable of every enabled extension.
    pub fn finalize(self, overrides: &TunableOverrides) -> CapabilitySnapshot {
        let mut tunables = Tunables::from_overrides(overrides);
        let translation_mode = self
            .value(ExtId::Satp)
            .map(|v| SatpMode::from_value(v as i64))
            .unwrap_or_default();
        let unaligned_access = self
            .value(ExtId::Unaligned)
            .map(|v| MisalignedAccess::from_value(v as i64))
            .unwrap_or_default();

        for id in self.enabled.iter() {
            let info = id.info();
            tracing::debug!(
                feature = info.name,
                value = self.value(id).unwrap_or(0),
                "enabled RV64 feature"
            );
            if let Some(tunable) = info.tunable {
                tunables.enable_default(tunable, overrides);
            }
        }
        tunables.translation_mode = translation_mode;
        tunables.set_unaligned_access(unaligned_access, overrides);

        let features_string = render_feature_string(self.uarch.as_deref(), self.enabled);
        CapabilitySnapshot {
            features: self.enabled.feature_mask(),
            features_string,
            extensions: self.enabled,
            vector_length: self.value(ExtId::V),
            mvendorid: self.value(ExtId::VendorId),
            marchid: self.value(ExtId::ArchId),
            mimpid: self.value(ExtId::ImpId),
            translation_mode,
            unaligned_access,
            uarch: self.uarch.filter(|u| !u.is_empty()),
            tunables,
        }
    }
}

/// Immutable result of detection, shared by every compilation
#[derive(Debug, Clone, Serialize)]
pub struct CapabilitySnapshot {
    /// HWCAP-style mask of enabled single-letter extensions
    pub features: u64,
    /// Canonical `[<uarch>,]rv64...` string
    pub features_string: String,
    pub extensions: ExtensionSet,
    /// `vlenb` in bytes, when V is enabled and readable
    pub vector_length: Option<u64>,
    pub mvendorid: Option<u64>,
    pub marchid: Option<u64>,
    pub mimpid: Option<u64>,
    pub translation_mode: SatpMode,
    pub unaligned_access: MisalignedAccess,
    pub uarch: Option<String>,
    pub tunables: Tunables,
}

impl CapabilitySnapshot {
    pub fn has(&self, id: ExtId) -> bool {
        self.extensions.contains(id)
    }

    /// Enabled extensions that show up in the feature string
    pub fn string_extensions(&self) -> impl Iterator<Item = ExtId> + '_ {
        self.extensions
            .iter()
            .filter(|id| id.info().kind != ExtensionKind::ValueOnly)
    }
}
