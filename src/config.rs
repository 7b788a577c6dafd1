//! Backend Configuration
//!
//! Handles parsing of rv64-backend.toml configuration files.

use crate::cpu::source::DEFAULT_CPUINFO_PATH;
use crate::cpu::Tunable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name searched for by [`BackendConfig::find_and_load`]
pub const CONFIG_FILE_NAME: &str = "rv64-backend.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching rv64-backend.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BackendConfig {
    /// Capability detection sources
    #[serde(default)]
    pub detection: DetectionConfig,

    /// Explicit tunable settings
    #[serde(default)]
    pub tunables: TunableOverrides,

    /// Stub emission settings
    #[serde(default)]
    pub stubs: StubConfig,
}

impl BackendConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: BackendConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE_NAME);
            if config_path.exists() {
                tracing::debug!(path = %config_path.display(), "loading backend config");
                return Self::load(&config_path);
            }
            if !dir.pop() {
                // Reached root without finding config
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Which detection sources to consult.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DetectionConfig {
    /// Query the riscv_hwprobe syscall
    #[serde(default = "default_true")]
    pub use_hwprobe: bool,

    /// Fall back to AT_HWCAP when hwprobe is unavailable
    #[serde(default = "default_true")]
    pub use_hwcap: bool,

    /// Apply vendor capability overlays
    #[serde(default = "default_true")]
    pub use_vendor_overlay: bool,

    /// cpuinfo file read for the MMU mode and uarch
    #[serde(default = "default_cpuinfo_path")]
    pub cpuinfo_path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_cpuinfo_path() -> PathBuf {
    PathBuf::from(DEFAULT_CPUINFO_PATH)
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            use_hwprobe: true,
            use_hwcap: true,
            use_vendor_overlay: true,
            cpuinfo_path: default_cpuinfo_path(),
        }
    }
}

/// Explicit tunable settings. Unset entries are defaulted from detection;
/// set entries are never changed by it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TunableOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_rvc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_rvv: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zba: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zbb: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zbs: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zicbom: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zicboz: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zicbop: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zic64b: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_ztso: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zihintpause: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zfh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zvfh: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_zacas: Option<bool>,

    /// Avoid misaligned memory accesses in generated code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avoid_unaligned_accesses: Option<bool>,
}

impl TunableOverrides {
    /// Explicit setting for `tunable`, if any
    pub fn get(&self, tunable: Tunable) -> Option<bool> {
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
}

/// Stub emission settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StubConfig {
    /// Default load address for emitted code
    #[serde(default = "default_code_base")]
    pub code_base: u64,
}

fn default_code_base() -> u64 {
    0x4000_0000
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            code_base: default_code_base(),
        }
    }
}
