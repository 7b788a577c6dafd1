//! `/proc/cpuinfo` scanning for the MMU mode and micro-architecture
//!
//! Only two colon-delimited fields matter: `mmu` and `uarch`. Each may appear
//! on any line, in any order, or not at all; the first occurrence wins and
//! reading stops as soon as both have been seen.

use super::tunables::SatpMode;
use std::io::BufRead;

/// Fields recovered from cpuinfo
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CpuInfo {
    /// First `mmu` value; unrecognized values parse as `Bare`
    pub mmu: Option<SatpMode>,
    pub uarch: Option<String>,
    pub lines_scanned: usize,
}

impl CpuInfo {
    /// Translation mode, `Bare` when no `mmu` line was present
    pub fn translation_mode(&self) -> SatpMode {
        self.mmu.unwrap_or_default()
    }
}

/// Scan `reader` until both fields are found or input ends. Read errors end
/// the scan like EOF; invalid UTF-8 is replaced, not rejected.
pub fn parse_cpuinfo<R: BufRead>(mut reader: R) -> CpuInfo {
    let mut info = CpuInfo::default();
    let mut line = Vec::with_capacity(128);

    while info.mmu.is_none() || info.uarch.is_none() {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::trace!(error = %e, "cpuinfo read failed");
                break;
            }
        }
        info.lines_scanned += 1;

        let text = String::from_utf8_lossy(&line);
        let Some((key, value)) = text.split_once(':') else {
            continue;
        };
        match key.trim() {
            "mmu" if info.mmu.is_none() => info.mmu = Some(SatpMode::parse(value)),
            "uarch" if info.uarch.is_none() => info.uarch = Some(value.trim().to_string()),
            _ => {}
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_typical_hart() {
        let text = "processor\t: 0\nhart\t\t: 1\nisa\t\t: rv64imafdc\nmmu\t\t: sv39\nuarch\t\t: sifive,u74-mc\n\nprocessor\t: 1\nmmu\t\t: sv48\n";
        let info = parse_cpuinfo(Cursor::new(text));
        assert_eq!(info.mmu, Some(SatpMode::Sv39));
        assert_eq!(info.uarch.as_deref(), Some("sifive,u74-mc"));
        assert_eq!(info.lines_scanned, 5);
    }

    #[test]
    fn test_fields_in_any_order() {
        let info = parse_cpuinfo(Cursor::new("uarch : thead,c910\nmmu : sv57\n"));
        assert_eq!(info.translation_mode(), SatpMode::Sv57);
        assert_eq!(info.uarch.as_deref(), Some("thead,c910"));
    }

    #[test]
    fn test_missing_fields() {
        let info = parse_cpuinfo(Cursor::new("processor : 0\nno colon here\n"));
        assert_eq!(info.mmu, None);
        assert_eq!(info.translation_mode(), SatpMode::Bare);
        assert_eq!(info.uarch, None);
        assert_eq!(info.lines_scanned, 2);
    }

    #[test]
    fn test_unrecognized_mmu_is_bare_and_final() {
        let info = parse_cpuinfo(Cursor::new("mmu : sv32\nmmu : sv48\n"));
        assert_eq!(info.mmu, Some(SatpMode::Bare));
    }

    #[test]
    fn test_lines_without_colon_ignored() {
        let info = parse_cpuinfo(Cursor::new("mmu sv48\nuarch\n"));
        assert_eq!(info.mmu, None);
        assert_eq!(info.uarch, None);
    }

    #[test]
    fn test_invalid_utf8_tolerated() {
        let mut bytes = b"model name : \xff\xfe\n".to_vec();
        bytes.extend_from_slice(b"mmu : sv39\n");
        let info = parse_cpuinfo(Cursor::new(bytes));
        assert_eq!(info.mmu, Some(SatpMode::Sv39));
    }
}
