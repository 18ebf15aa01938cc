//! 128-bit attribute identifiers.
//!
//! Peer services and characteristics are identified by vendor 128-bit UUIDs,
//! configured as canonical `8-4-4-4-12` strings. Descriptors use the
//! standard 16-bit Bluetooth SIG identifiers (only the CCCD matters here).

use core::fmt;

/// The Client Characteristic Configuration descriptor — writing
/// `{0x01, 0x00}` to it enables notifications on the owning characteristic.
pub const CCCD_UUID16: u16 = 0x2902;

/// A 128-bit attribute identifier, stored most-significant-byte first so
/// that the numeric value reads like the canonical string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid128(pub u128);

impl Uuid128 {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// Parse a canonical `8-4-4-4-12` UUID string.
    /// Returns `None` on any malformed input (wrong length, misplaced
    /// hyphens, non-hex digits).
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != 36 {
            return None;
        }

        let mut value: u128 = 0;
        for (i, &b) in bytes.iter().enumerate() {
            if matches!(i, 8 | 13 | 18 | 23) {
                if b != b'-' {
                    return None;
                }
                continue;
            }
            let digit = (b as char).to_digit(16)? as u128;
            value = (value << 4) | digit;
        }
        Some(Self(value))
    }
}

impl fmt::Display for Uuid128 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff,
        )
    }
}
