//! Python version identification from .pyc magic numbers.
//!
//! The first four bytes of a .pyc file identify the interpreter release that
//! produced it. Exact magics are recognized for every release from 1.0
//! through 3.14; unrecognized 3.x magics are approximated from the
//! documented per-release ranges. Unknown pre-3 magics are rejected since
//! the 1.x/2.x numbering has no usable structure.

use std::fmt;
use std::sync::OnceLock;

use ahash::AHashMap;

use crate::errors::LoadError;

/// An interpreter release, `(major, minor)`.
///
/// Ordering is derived, so version gates read naturally:
/// `if version >= Version::new(3, 11) { ... }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
}

impl Version {
    #[must_use]
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }

    /// True for 3.6+ wordcode (every instruction is a 2-byte unit).
    #[must_use]
    pub fn is_wordcode(self) -> bool {
        self >= Self::new(3, 6)
    }

    /// True for releases that follow certain opcodes with inline cache words.
    #[must_use]
    pub fn has_inline_caches(self) -> bool {
        self >= Self::new(3, 11)
    }

    /// True for releases that describe exception regions with a table
    /// rather than SETUP_* pseudo-instructions.
    #[must_use]
    pub fn has_exception_table(self) -> bool {
        self >= Self::new(3, 11)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Every release with an opcode table, oldest first.
///
/// 1.2 reuses 1.1's magic and table, so it does not appear separately.
pub const SUPPORTED: &[Version] = &[
    Version::new(1, 0),
    Version::new(1, 1),
    Version::new(1, 3),
    Version::new(1, 4),
    Version::new(1, 5),
    Version::new(1, 6),
    Version::new(2, 0),
    Version::new(2, 1),
    Version::new(2, 2),
    Version::new(2, 3),
    Version::new(2, 4),
    Version::new(2, 5),
    Version::new(2, 6),
    Version::new(2, 7),
    Version::new(3, 0),
    Version::new(3, 1),
    Version::new(3, 2),
    Version::new(3, 3),
    Version::new(3, 4),
    Version::new(3, 5),
    Version::new(3, 6),
    Version::new(3, 7),
    Version::new(3, 8),
    Version::new(3, 9),
    Version::new(3, 10),
    Version::new(3, 11),
    Version::new(3, 12),
    Version::new(3, 13),
    Version::new(3, 14),
];

/// Exact magic words, one entry per release (final-release values, plus the
/// historical variants that shipped in maintenance releases).
///
/// For 1.3+ the stored 32-bit little-endian word carries `\r\n` in its high
/// half; for 1.0–1.2 the word is an unstructured constant.
const MAGICS: &[(u32, Version)] = &[
    (0x0099_9902, Version::new(1, 0)),
    (0x0099_9903, Version::new(1, 1)), // also 1.2
    (0x0A0D_2E89, Version::new(1, 3)),
    (0x0A0D_1704, Version::new(1, 4)),
    (0x0A0D_4E99, Version::new(1, 5)),
    (0x0A0D_C4FC, Version::new(1, 6)),
    (0x0A0D_C687, Version::new(2, 0)),
    (0x0A0D_EB2A, Version::new(2, 1)),
    (0x0A0D_ED2D, Version::new(2, 2)),
    (0x0A0D_F23B, Version::new(2, 3)),
    (0x0A0D_F26D, Version::new(2, 4)),
    (0x0A0D_F2B3, Version::new(2, 5)),
    (0x0A0D_F2D1, Version::new(2, 6)),
    (0x0A0D_F303, Version::new(2, 7)),
    (0x0A0D_0C3B, Version::new(3, 0)),
    (0x0A0D_0C4F, Version::new(3, 1)),
    (0x0A0D_0C6C, Version::new(3, 2)),
    (0x0A0D_0C9E, Version::new(3, 3)),
    (0x0A0D_0CEE, Version::new(3, 4)),
    (0x0A0D_0D16, Version::new(3, 5)),
    (0x0A0D_0D17, Version::new(3, 5)), // 3.5.3+
    (0x0A0D_0D33, Version::new(3, 6)),
    (0x0A0D_0D42, Version::new(3, 7)),
    (0x0A0D_0D55, Version::new(3, 8)),
    (0x0A0D_0D61, Version::new(3, 9)),
    (0x0A0D_0D6F, Version::new(3, 10)),
    (0x0A0D_0DA7, Version::new(3, 11)),
    (0x0A0D_0DCB, Version::new(3, 12)),
    (0x0A0D_0DF3, Version::new(3, 13)),
    (0x0A0D_0E29, Version::new(3, 14)),
];

/// Documented 3.x magic-word ranges, used when an exact match fails.
///
/// The low 16 bits of a 3.x magic are a monotonically increasing counter;
/// each release owns a contiguous span of it.
const RANGES_3X: &[(u16, u16, Version)] = &[
    (3000, 3131, Version::new(3, 0)),
    (3141, 3151, Version::new(3, 1)),
    (3160, 3180, Version::new(3, 2)),
    (3190, 3230, Version::new(3, 3)),
    (3250, 3310, Version::new(3, 4)),
    (3320, 3351, Version::new(3, 5)),
    (3360, 3379, Version::new(3, 6)),
    (3390, 3399, Version::new(3, 7)),
    (3400, 3419, Version::new(3, 8)),
    (3420, 3429, Version::new(3, 9)),
    (3430, 3449, Version::new(3, 10)),
    (3450, 3499, Version::new(3, 11)),
    (3500, 3549, Version::new(3, 12)),
    (3550, 3599, Version::new(3, 13)),
    (3600, 3649, Version::new(3, 14)),
];

fn magic_map() -> &'static AHashMap<u32, Version> {
    static MAP: OnceLock<AHashMap<u32, Version>> = OnceLock::new();
    MAP.get_or_init(|| MAGICS.iter().copied().collect())
}

/// Resolves a magic word to the release that produced it.
///
/// Exact magics win; otherwise a 3.x magic (high half `\r\n`, counter in
/// range) is approximated from `RANGES_3X`.
///
/// # Errors
///
/// `LoadError::UnsupportedVersion` when the word matches nothing.
pub fn magic_to_version(magic: u32) -> Result<Version, LoadError> {
    if let Some(&version) = magic_map().get(&magic) {
        return Ok(version);
    }
    // 3.x magics carry "\r\n" in the high half and a release counter in the
    // low half. 1.x/2.x counters are not monotonic, so no range fallback.
    if magic >> 16 == 0x0A0D {
        let word = (magic & 0xFFFF) as u16;
        for &(lo, hi, version) in RANGES_3X {
            if (lo..=hi).contains(&word) {
                log::debug!("approximating magic 0x{magic:08x} (counter {word}) as Python {version}");
                return Ok(version);
            }
        }
    }
    Err(LoadError::UnsupportedVersion(magic))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_magics_resolve() {
        assert_eq!(magic_to_version(0x0A0D_F303).unwrap(), Version::new(2, 7));
        assert_eq!(magic_to_version(0x0A0D_0D6F).unwrap(), Version::new(3, 10));
        assert_eq!(magic_to_version(0x0A0D_0E29).unwrap(), Version::new(3, 14));
        assert_eq!(magic_to_version(0x0099_9902).unwrap(), Version::new(1, 0));
    }

    #[test]
    fn range_fallback_for_unknown_3x() {
        // 3495 is a 3.11 pre-release counter with no exact entry.
        assert_eq!(magic_to_version(0x0A0D_0DA6).unwrap(), Version::new(3, 11));
        // 3624 sits in the 3.14 span.
        assert_eq!(magic_to_version(0x0A0D_0E28).unwrap(), Version::new(3, 14));
    }

    #[test]
    fn unknown_pre3_magic_rejected() {
        assert!(matches!(
            magic_to_version(0x0A0D_BEEF),
            Err(LoadError::UnsupportedVersion(_))
        ));
        assert!(matches!(magic_to_version(0x1234_5678), Err(LoadError::UnsupportedVersion(_))));
    }

    #[test]
    fn ordering_gates() {
        assert!(Version::new(3, 11) > Version::new(3, 6));
        assert!(Version::new(3, 6).is_wordcode());
        assert!(!Version::new(3, 5).is_wordcode());
        assert!(Version::new(3, 11).has_inline_caches());
        assert!(!Version::new(3, 10).has_inline_caches());
    }

    #[test]
    fn every_supported_version_has_a_magic() {
        for &version in SUPPORTED {
            assert!(
                MAGICS.iter().any(|&(_, v)| v == version),
                "no magic for {version}"
            );
        }
    }
}
