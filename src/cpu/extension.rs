//! Extension registry
//!
//! A fixed, ordered table of every extension and platform value the detector
//! knows about. Table order is display order in the feature string.
//!
//! | Entry | Kind | HWCAP bit | Tunable |
//! |-------|------|-----------|---------|
//! | i m a f d q h | single letter | `1 << (letter - 'A')` | - |
//! | c | single letter | `1 << 2` | `use_rvc` |
//! | v | single letter | `1 << 21` | `use_rvv` |
//! | Zxxx | multi letter | - | some have `use_zxxx` |
//! | VendorId ArchId ImpId Unaligned SATP | value only | - | - |

use super::tunables::Tunable;
use serde::{Serialize, Serializer};
use std::fmt;

/// How an entry shows up in the feature string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExtensionKind {
    /// Bare lowercase letter, e.g. `i`
    SingleLetter,
    /// `_` + lowercase name, e.g. `_zba`
    MultiLetter,
    /// Carries a value, never rendered
    ValueOnly,
}

/// Identifier of a registry entry; the discriminant is its registry index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[repr(u8)]
pub enum ExtId {
    I,
    M,
    A,
    F,
    D,
    C,
    Q,
    H,
    V,
    Zicsr,
    Zifencei,
    Zic64b,
    Zicbom,
    Zicboz,
    Zicbop,
    Zihintpause,
    Zba,
    Zbb,
    Zbc,
    Zbs,
    Zfh,
    Zvfh,
    Ztso,
    Zacas,
    VendorId,
    ArchId,
    ImpId,
    Unaligned,
    Satp,
}

/// Number of registry entries
pub const EXTENSION_COUNT: usize = 29;

/// Static description of a registry entry
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ExtensionInfo {
    pub id: ExtId,
    pub name: &'static str,
    /// Kernel HWCAP bit, 0 when the kernel has none
    pub bit: u64,
    pub kind: ExtensionKind,
    /// Tunable defaulted on when this entry is enabled
    pub tunable: Option<Tunable>,
}

/// HWCAP bit for a single-letter extension
pub const fn letter_bit(letter: u8) -> u64 {
    1 << (letter - b'A')
}

const fn single(id: ExtId, name: &'static str, letter: u8, tunable: Option<Tunable>) -> ExtensionInfo {
    ExtensionInfo {
        id,
        name,
        bit: letter_bit(letter),
        kind: ExtensionKind::SingleLetter,
        tunable,
    }
}

const fn multi(id: ExtId, name: &'static str, tunable: Option<Tunable>) -> ExtensionInfo {
    ExtensionInfo {
        id,
        name,
        bit: 0,
        kind: ExtensionKind::MultiLetter,
        tunable,
    }
}

const fn value(id: ExtId, name: &'static str) -> ExtensionInfo {
    ExtensionInfo {
        id,
        name,
        bit: 0,
        kind: ExtensionKind::ValueOnly,
        tunable: None,
    }
}

/// The registry, indexed by `ExtId as usize`
pub static REGISTRY: [ExtensionInfo; EXTENSION_COUNT] = [
    single(ExtId::I, "i", b'I', None),
    single(ExtId::M, "m", b'M', None),
    single(ExtId::A, "a", b'A', None),
    single(ExtId::F, "f", b'F', None),
    single(ExtId::D, "d", b'D', None),
    single(ExtId::C, "c", b'C', Some(Tunable::UseRvc)),
    single(ExtId::Q, "q", b'Q', None),
    single(ExtId::H, "h", b'H', None),
    single(ExtId::V, "v", b'V', Some(Tunable::UseRvv)),
    multi(ExtId::Zicsr, "Zicsr", None),
    multi(ExtId::Zifencei, "Zifencei", None),
    multi(ExtId::Zic64b, "Zic64b", Some(Tunable::UseZic64b)),
    multi(ExtId::Zicbom, "Zicbom", Some(Tunable::UseZicbom)),
    multi(ExtId::Zicboz, "Zicboz", Some(Tunable::UseZicboz)),
    multi(ExtId::Zicbop, "Zicbop", Some(Tunable::UseZicbop)),
    multi(ExtId::Zihintpause, "Zihintpause", Some(Tunable::UseZihintpause)),
    multi(ExtId::Zba, "Zba", Some(Tunable::UseZba)),
    multi(ExtId::Zbb, "Zbb", Some(Tunable::UseZbb)),
    multi(ExtId::Zbc, "Zbc", None),
    multi(ExtId::Zbs, "Zbs", Some(Tunable::UseZbs)),
    multi(ExtId::Zfh, "Zfh", Some(Tunable::UseZfh)),
    multi(ExtId::Zvfh, "Zvfh", Some(Tunable::UseZvfh)),
    multi(ExtId::Ztso, "Ztso", Some(Tunable::UseZtso)),
    multi(ExtId::Zacas, "Zacas", Some(Tunable::UseZacas)),
    value(ExtId::VendorId, "VendorId"),
    value(ExtId::ArchId, "ArchId"),
    value(ExtId::ImpId, "ImpId"),
    value(ExtId::Unaligned, "Unaligned"),
    value(ExtId::Satp, "SATP"),
];

impl ExtId {
    /// Every entry in registry order
    pub const ALL: [ExtId; EXTENSION_COUNT] = [
        ExtId::I,
        ExtId::M,
        ExtId::A,
        ExtId::F,
        ExtId::D,
        ExtId::C,
        ExtId::Q,
        ExtId::H,
        ExtId::V,
        ExtId::Zicsr,
        ExtId::Zifencei,
        ExtId::Zic64b,
        ExtId::Zicbom,
        ExtId::Zicboz,
        ExtId::Zicbop,
        ExtId::Zihintpause,
        ExtId::Zba,
        ExtId::Zbb,
        ExtId::Zbc,
        ExtId::Zbs,
        ExtId::Zfh,
        ExtId::Zvfh,
        ExtId::Ztso,
        ExtId::Zacas,
        ExtId::VendorId,
        ExtId::ArchId,
        ExtId::ImpId,
        ExtId::Unaligned,
        ExtId::Satp,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub fn info(self) -> &'static ExtensionInfo {
        &REGISTRY[self.index()]
    }

    pub fn name(self) -> &'static str {
        self.info().name
    }

    /// Look up an entry by its registry name (case-insensitive)
    pub fn from_name(name: &str) -> Option<ExtId> {
        ExtId::ALL
            .iter()
            .copied()
            .find(|id| id.name().eq_ignore_ascii_case(name))
    }
}

impl ExtensionInfo {
    /// Token this entry contributes to the feature string
    pub fn display_token(&self) -> Option<String> {
        match self.kind {
            ExtensionKind::SingleLetter => Some(self.name.to_ascii_lowercase()),
            ExtensionKind::MultiLetter => Some(format!("_{}", self.name.to_ascii_lowercase())),
            ExtensionKind::ValueOnly => None,
        }
    }
}

/// A set of registry entries, iterated in registry order
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ExtensionSet(u32);

impl ExtensionSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, id: ExtId) -> bool {
        let fresh = !self.contains(id);
        self.0 |= 1 << id.index();
        fresh
    }

    #[inline]
    pub fn contains(&self, id: ExtId) -> bool {
        self.0 & (1 << id.index()) != 0
    }

    pub fn is_superset(&self, other: &ExtensionSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = ExtId> + '_ {
        ExtId::ALL.iter().copied().filter(|id| self.contains(*id))
    }

    /// HWCAP-style mask of the members that have a kernel bit
    pub fn feature_mask(&self) -> u64 {
        self.iter().fold(0, |mask, id| mask | id.info().bit)
    }
}

impl FromIterator<ExtId> for ExtensionSet {
    fn from_iter<T: IntoIterator<Item = ExtId>>(iter: T) -> Self {
        let mut set = ExtensionSet::empty();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl Serialize for ExtensionSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter().map(ExtId::name))
    }
}
