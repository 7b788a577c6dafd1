//! Tunables derived from detected capabilities
//!
//! Every enabled extension that has a tunable switches it on, unless the
//! tunable was set explicitly in configuration. Explicit settings always win,
//! in either direction.

use crate::config::TunableOverrides;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Boolean tunables an extension can default on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tunable {
    UseRvc,
    UseRvv,
    UseZba,
    UseZbb,
    UseZbs,
    UseZicbom,
    UseZicboz,
    UseZicbop,
    UseZic64b,
    UseZtso,
    UseZihintpause,
    UseZfh,
    UseZvfh,
    UseZacas,
}

/// Virtual-address translation mode (satp.MODE encodings)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SatpMode {
    #[default]
    Bare = 0,
    Sv39 = 8,
    Sv48 = 9,
    Sv57 = 10,
    Sv64 = 11,
}

impl SatpMode {
    /// Parse a cpuinfo `mmu` value. Unrecognized values mean `Bare`.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "sv39" => SatpMode::Sv39,
            "sv48" => SatpMode::Sv48,
            "sv57" => SatpMode::Sv57,
            "sv64" => SatpMode::Sv64,
            _ => SatpMode::Bare,
        }
    }

    pub fn from_value(value: i64) -> Self {
        match value {
            8 => SatpMode::Sv39,
            9 => SatpMode::Sv48,
            10 => SatpMode::Sv57,
            11 => SatpMode::Sv64,
            _ => SatpMode::Bare,
        }
    }

    /// Virtual address bits translated in this mode
    pub fn va_bits(self) -> Option<u32> {
        match self {
            SatpMode::Bare => None,
            SatpMode::Sv39 => Some(39),
            SatpMode::Sv48 => Some(48),
            SatpMode::Sv57 => Some(57),
            SatpMode::Sv64 => Some(64),
        }
    }
}

impl fmt::Display for SatpMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SatpMode::Bare => "bare",
            SatpMode::Sv39 => "sv39",
            SatpMode::Sv48 => "sv48",
            SatpMode::Sv57 => "sv57",
            SatpMode::Sv64 => "sv64",
        };
        f.write_str(name)
    }
}

/// Misaligned scalar access performance class (hwprobe `CPUPERF_0`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MisalignedAccess {
    #[default]
    Unknown = 0,
    Emulated = 1,
    Slow = 2,
    Fast = 3,
    Unsupported = 4,
}

impl MisalignedAccess {
    pub fn from_value(value: i64) -> Self {
        match value {
            1 => MisalignedAccess::Emulated,
            2 => MisalignedAccess::Slow,
            3 => MisalignedAccess::Fast,
            4 => MisalignedAccess::Unsupported,
            _ => MisalignedAccess::Unknown,
        }
    }
}

/// Final tunable values consumed by code generation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tunables {
    pub use_rvc: bool,
    pub use_rvv: bool,
    pub use_zba: bool,
    pub use_zbb: bool,
    pub use_zbs: bool,
    pub use_zicbom: bool,
    pub use_zicboz: bool,
    pub use_zicbop: bool,
    pub use_zic64b: bool,
    pub use_ztso: bool,
    pub use_zihintpause: bool,
    pub use_zfh: bool,
    pub use_zvfh: bool,
    pub use_zacas: bool,
    /// Emit byte-wise sequences instead of misaligned loads/stores
    pub avoid_unaligned_accesses: bool,
    pub unaligned_access: MisalignedAccess,
    pub translation_mode: SatpMode,
}

impl Tunables {
    /// Start from explicit settings; everything else is off
    pub fn from_overrides(overrides: &TunableOverrides) -> Self {
        let mut tunables = Tunables::default();
        for tunable in Tunable::ALL {
            *tunables.flag_mut(tunable) = overrides.get(tunable).unwrap_or(false);
        }
        tunables.avoid_unaligned_accesses = overrides.avoid_unaligned_accesses.unwrap_or(true);
        tunables
    }

    pub fn flag(&self, tunable: Tunable) -> bool {
        match tunable {
            Tunable::UseRvc => self.use_rvc,
            Tunable::UseRvv => self.use_rvv,
            Tunable::UseZba => self.use_zba,
            Tunable::UseZbb => self.use_zbb,
            Tunable::UseZbs => self.use_zbs,
            Tunable::UseZicbom => self.use_zicbom,
            Tunable::UseZicboz => self.use_zicboz,
            Tunable::UseZicbop => self.use_zicbop,
            Tunable::UseZic64b => self.use_zic64b,
            Tunable::UseZtso => self.use_ztso,
            Tunable::UseZihintpause => self.use_zihintpause,
            Tunable::UseZfh => self.use_zfh,
            Tunable::UseZvfh => self.use_zvfh,
            Tunable::UseZacas => self.use_zacas,
        }
    }

    fn flag_mut(&mut self, tunable: Tunable) -> &mut bool {
        match tunable {
            Tunable::UseRvc => &mut self.use_rvc,
            Tunable::UseRvv => &mut self.use_rvv,
            Tunable::UseZba => &mut self.use_zba,
            Tunable::UseZbb => &mut self.use_zbb,
            Tunable::UseZbs => &mut self.use_zbs,
            Tunable::UseZicbom => &mut self.use_zicbom,
            Tunable::UseZicboz => &mut self.use_zicboz,
            Tunable::UseZicbop => &mut self.use_zicbop,
            Tunable::UseZic64b => &mut self.use_zic64b,
            Tunable::UseZtso => &mut self.use_ztso,
            Tunable::UseZihintpause => &mut self.use_zihintpause,
            Tunable::UseZfh => &mut self.use_zfh,
            Tunable::UseZvfh => &mut self.use_zvfh,
            Tunable::UseZacas => &mut self.use_zacas,
        }
    }

    /// Default `tunable` on unless it was set explicitly
    pub fn enable_default(&mut self, tunable: Tunable, overrides: &TunableOverrides) {
        if overrides.get(tunable).is_none() {
            *self.flag_mut(tunable) = true;
        }
    }

    /// Record the misaligned access class and derive the alignment strategy
    pub fn set_unaligned_access(&mut self, class: MisalignedAccess, overrides: &TunableOverrides) {
        self.unaligned_access = class;
        if overrides.avoid_unaligned_accesses.is_none() {
            self.avoid_unaligned_accesses = class != MisalignedAccess::Fast;
        }
    }
}

impl Tunable {
    pub const ALL: [Tunable; 14] = [
        Tunable::UseRvc,
        Tunable::UseRvv,
        Tunable::UseZba,
        Tunable::UseZbb,
        Tunable::UseZbs,
        Tunable::UseZicbom,
        Tunable::UseZicboz,
        Tunable::UseZicbop,
        Tunable::UseZic64b,
        Tunable::UseZtso,
        Tunable::UseZihintpause,
        Tunable::UseZfh,
        Tunable::UseZvfh,
        Tunable::UseZacas,
    ];
}
