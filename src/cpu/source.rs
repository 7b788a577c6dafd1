//! Platform capability sources
//!
//! Detection never talks to the kernel directly; it asks a [`PlatformSource`].
//! [`LinuxSource`] is the real thing, [`FixedSource`] replays canned answers.
//! Every query may come back empty, which the pipeline treats as "skip".

use std::io::{BufRead, BufReader, Cursor};
use std::path::PathBuf;

/// One hwprobe key/value pair. The kernel writes `-1` into `key` when it
/// does not know the requested key.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HwProbePair {
    pub key: i64,
    pub value: u64,
}

impl HwProbePair {
    pub fn new(key: i64, value: u64) -> Self {
        Self { key, value }
    }
}

/// Query surface used by detection
pub trait PlatformSource {
    /// Run hwprobe for `keys`. `None` when the call is unavailable or failed.
    fn hwprobe(&self, keys: &[i64]) -> Option<Vec<HwProbePair>>;

    /// `AT_HWCAP` from the auxiliary vector
    fn hwcap(&self) -> Option<u64>;

    /// Reader over `/proc/cpuinfo`-formatted text
    fn cpuinfo(&self) -> Option<Box<dyn BufRead + '_>>;

    /// Vector register length in bytes. Only queried once `V` is enabled.
    fn vector_length(&self) -> Option<u64>;
}

impl<S: PlatformSource + ?Sized> PlatformSource for &S {
    fn hwprobe(&self, keys: &[i64]) -> Option<Vec<HwProbePair>> {
        (**self).hwprobe(keys)
    }

    fn hwcap(&self) -> Option<u64> {
        (**self).hwcap()
    }

    fn cpuinfo(&self) -> Option<Box<dyn BufRead + '_>> {
        (**self).cpuinfo()
    }

    fn vector_length(&self) -> Option<u64> {
        (**self).vector_length()
    }
}

/// Default cpuinfo location
pub const DEFAULT_CPUINFO_PATH: &str = "/proc/cpuinfo";

/// Queries the running Linux kernel
#[derive(Debug, Clone)]
pub struct LinuxSource {
    cpuinfo_path: PathBuf,
}

impl Default for LinuxSource {
    fn default() -> Self {
        Self::new(DEFAULT_CPUINFO_PATH)
    }
}

impl LinuxSource {
    pub fn new(cpuinfo_path: impl Into<PathBuf>) -> Self {
        Self {
            cpuinfo_path: cpuinfo_path.into(),
        }
    }
}

#[cfg(all(target_os = "linux", target_arch = "riscv64"))]
mod sys {
    use super::HwProbePair;

    const SYS_RISCV_HWPROBE: libc::c_long = 258;

    pub fn hwprobe(keys: &[i64]) -> Option<Vec<HwProbePair>> {
        let mut pairs: Vec<HwProbePair> = keys.iter().map(|&key| HwProbePair::new(key, 0)).collect();
        // SAFETY: `pairs` is a valid, writable array of `pairs.len()` repr(C)
        // pairs; an empty cpu set (size 0, null) means "all online cpus".
        let ret = unsafe {
            libc::syscall(
                SYS_RISCV_HWPROBE,
                pairs.as_mut_ptr(),
                pairs.len() as libc::size_t,
                0 as libc::size_t,
                std::ptr::null_mut::<libc::c_ulong>(),
                0 as libc::c_uint,
            )
        };
        (ret == 0).then_some(pairs)
    }

    pub fn hwcap() -> Option<u64> {
        // SAFETY: getauxval has no preconditions.
        let value = unsafe { libc::getauxval(libc::AT_HWCAP) };
        (value != 0).then_some(value as u64)
    }

    pub fn vlenb() -> u64 {
        let value: u64;
        // SAFETY: only called once V is known to be present, so vlenb is
        // readable from user mode.
        unsafe {
            std::arch::asm!("csrr {0}, 0xc22", out(reg) value, options(nomem, nostack));
        }
        value
    }
}

#[cfg(not(all(target_os = "linux", target_arch = "riscv64")))]
mod sys {
    use super::HwProbePair;

    pub fn hwprobe(_keys: &[i64]) -> Option<Vec<HwProbePair>> {
        None
    }

    pub fn hwcap() -> Option<u64> {
        None
    }

    pub fn vlenb() -> u64 {
        0
    }
}

impl PlatformSource for LinuxSource {
    fn hwprobe(&self, keys: &[i64]) -> Option<Vec<HwProbePair>> {
        sys::hwprobe(keys)
    }

    fn hwcap(&self) -> Option<u64> {
        sys::hwcap()
    }

    fn cpuinfo(&self) -> Option<Box<dyn BufRead + '_>> {
        match std::fs::File::open(&self.cpuinfo_path) {
            Ok(file) => Some(Box::new(BufReader::new(file))),
            Err(e) => {
                tracing::trace!(path = %self.cpuinfo_path.display(), error = %e, "cpuinfo unavailable");
                None
            }
        }
    }

    fn vector_length(&self) -> Option<u64> {
        match sys::vlenb() {
            0 => None,
            vlenb => Some(vlenb),
        }
    }
}

/// In-memory source with fixed answers
#[derive(Debug, Clone, Default)]
pub struct FixedSource {
    hwprobe: Option<Vec<HwProbePair>>,
    hwcap: Option<u64>,
    cpuinfo: Option<String>,
    vector_length: Option<u64>,
}

impl FixedSource {
    /// A source where everything is unavailable
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hwprobe(mut self, pairs: Vec<HwProbePair>) -> Self {
        self.hwprobe = Some(pairs);
        self
    }

    pub fn with_hwcap(mut self, hwcap: u64) -> Self {
        self.hwcap = Some(hwcap);
        self
    }

    pub fn with_cpuinfo(mut self, text: impl Into<String>) -> Self {
        self.cpuinfo = Some(text.into());
        self
    }

    pub fn with_vector_length(mut self, vlenb: u64) -> Self {
        self.vector_length = Some(vlenb);
        self
    }
}

impl PlatformSource for FixedSource {
    /// Answers only the requested keys, marking keys it has no value for as
    /// unknown the way the kernel does.
    fn hwprobe(&self, keys: &[i64]) -> Option<Vec<HwProbePair>> {
        let known = self.hwprobe.as_ref()?;
        let answered = keys
            .iter()
            .map(|&key| {
                known
                    .iter()
                    .find(|pair| pair.key == key)
                    .copied()
                    .unwrap_or(HwProbePair::new(-1, 0))
            })
            .collect();
        Some(answered)
    }

    fn hwcap(&self) -> Option<u64> {
        self.hwcap
    }

    fn cpuinfo(&self) -> Option<Box<dyn BufRead + '_>> {
        self.cpuinfo
            .as_ref()
            .map(|text| Box::new(Cursor::new(text.as_bytes())) as Box<dyn BufRead + '_>)
    }

    fn vector_length(&self) -> Option<u64> {
        self.vector_length
    }
}
