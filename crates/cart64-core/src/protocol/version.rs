//! Device identity learned from the version handshake.

use std::fmt;

use super::constants::RESTRICTED_VARIANT_MARKER;

/// Identity and capability info for an attached device.
///
/// Populated once per session by the handshake and read-only afterward.
/// The hardware version (1 or 2) comes from USB enumeration, not from the
/// GETVER response; the response only carries the variant code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionInfo {
    variant: [u8; 3],
    hw_version: u8,
}

impl VersionInfo {
    pub(crate) fn new(variant: [u8; 3], hw_version: u8) -> Self {
        Self {
            variant,
            hw_version,
        }
    }

    /// Raw 3-character hardware revision code, verbatim from the device.
    pub fn variant(&self) -> [u8; 3] {
        self.variant
    }

    pub fn variant_str(&self) -> String {
        self.variant.iter().map(|&b| b as char).collect()
    }

    pub fn hw_version(&self) -> u8 {
        self.hw_version
    }

    /// The variant bytes packed into the upper 24 bits of a word, the way
    /// the original firmware tooling reported a successful handshake.
    pub fn packed(&self) -> u32 {
        (self.variant[0] as u32) << 24 | (self.variant[1] as u32) << 16 | (self.variant[2] as u32) << 8
    }

    /// Whether this hardware revision can change CIC mode. Revision "A"
    /// boards cannot.
    pub fn supports_cic_select(&self) -> bool {
        self.variant[0] != RESTRICTED_VARIANT_MARKER
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HW{} rev {}", self.hw_version, self.variant_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_encoding() {
        let info = VersionInfo::new(*b"B2F", 2);
        assert_eq!(info.packed(), 0x4232_4600);
    }

    #[test]
    fn test_cic_capability_gate() {
        assert!(!VersionInfo::new(*b"A2B", 1).supports_cic_select());
        assert!(VersionInfo::new(*b"B2F", 2).supports_cic_select());
    }

    #[test]
    fn test_display() {
        let info = VersionInfo::new(*b"B2F", 2);
        assert_eq!(info.to_string(), "HW2 rev B2F");
    }
}
