//! RISC-V capability detection
//!
//! Detection runs once at bring-up and produces an immutable
//! [`CapabilitySnapshot`]. Sources are consulted in a fixed order, each only
//! adding to what the previous ones found:
//!
//! ```text
//!   hwprobe ──(failed)──► AT_HWCAP
//!      │                      │
//!      └──────────┬───────────┘
//!                 ▼
//!          /proc/cpuinfo (mmu, uarch)
//!                 │
//!                 ▼
//!          vendor overlay (by mvendorid)
//!                 │
//!                 ▼
//!          vlenb (when V is enabled)
//!                 │
//!                 ▼
//!          finalize: mask, feature string, tunables
//! ```
//!
//! A missing source is skipped. Detection cannot fail.

pub mod cpuinfo;
pub mod extension;
pub mod feature_string;
pub mod hwcap;
pub mod hwprobe;
pub mod snapshot;
pub mod source;
pub mod tunables;
pub mod vendor;

pub use cpuinfo::{parse_cpuinfo, CpuInfo};
pub use extension::{ExtId, ExtensionInfo, ExtensionKind, ExtensionSet, REGISTRY};
pub use feature_string::render_feature_string;
pub use snapshot::{CapabilityBuilder, CapabilitySnapshot};
pub use source::{FixedSource, HwProbePair, LinuxSource, PlatformSource};
pub use tunables::{MisalignedAccess, SatpMode, Tunable, Tunables};

use crate::config::{BackendConfig, DetectionConfig, TunableOverrides};
use once_cell::sync::OnceCell;

static CAPABILITIES: OnceCell<CapabilitySnapshot> = OnceCell::new();

/// Run detection against `source` with default settings
pub fn detect(source: &dyn PlatformSource) -> CapabilitySnapshot {
    detect_with(source, &DetectionConfig::default(), &TunableOverrides::default())
}

/// Run detection against `source`
pub fn detect_with(
    source: &dyn PlatformSource,
    config: &DetectionConfig,
    overrides: &TunableOverrides,
) -> CapabilitySnapshot {
    hwcap::check_kernel_abi();
    let mut caps = CapabilityBuilder::new();

    let probed = config.use_hwprobe
        && match source.hwprobe(&hwprobe::PROBE_KEYS) {
            Some(pairs) => {
                hwprobe::apply(&pairs, &mut caps);
                true
            }
            None => {
                tracing::trace!("hwprobe unavailable");
                false
            }
        };

    if !probed && config.use_hwcap {
        match source.hwcap() {
            Some(bits) => hwcap::apply(bits, &mut caps),
            None => tracing::trace!("AT_HWCAP unavailable"),
        }
    }

    match source.cpuinfo() {
        Some(reader) => {
            let info = parse_cpuinfo(reader);
            caps.set_translation_mode(info.translation_mode());
            if let Some(uarch) = info.uarch {
                caps.set_uarch(uarch);
            }
        }
        None => tracing::trace!("cpuinfo unavailable"),
    }

    if config.use_vendor_overlay {
        vendor::apply(&mut caps);
    }

    if caps.is_enabled(ExtId::V) {
        match source.vector_length() {
            Some(vlenb) => caps.enable_with_value(ExtId::V, vlenb),
            None => tracing::trace!("vector length unavailable"),
        }
    }

    caps.finalize(overrides)
}

/// Detect on the running host using `config`
pub fn detect_host(config: &BackendConfig) -> CapabilitySnapshot {
    let source = LinuxSource::new(&config.detection.cpuinfo_path);
    detect_with(&source, &config.detection, &config.tunables)
}

/// Publish the process-wide snapshot, detecting it from `source` on the
/// first call. Later calls return the already published snapshot.
pub fn initialize(source: &dyn PlatformSource, config: &BackendConfig) -> &'static CapabilitySnapshot {
    CAPABILITIES.get_or_init(|| {
        let snapshot = detect_with(source, &config.detection, &config.tunables);
        tracing::debug!(features = %snapshot.features_string, "published CPU capabilities");
        snapshot
    })
}

/// The process-wide snapshot, detecting on the host with default settings
/// if nothing was published yet
pub fn capabilities() -> &'static CapabilitySnapshot {
    CAPABILITIES.get_or_init(|| detect_host(&BackendConfig::default()))
}

/// The process-wide snapshot, if it has been published
pub fn try_capabilities() -> Option<&'static CapabilitySnapshot> {
    CAPABILITIES.get()
}
