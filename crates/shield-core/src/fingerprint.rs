//! Session fingerprints.
//!
//! Environment attributes are joined into one string and folded through a
//! 32-bit `hash * 31 + unit` rolling hash with wraparound, the same fold
//! the web viewers use, so both sides agree bit for bit.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::Clock;
use crate::host::{DisplayGeometry, HostEnvironment};

/// Snapshot of the attributes a fingerprint is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentAttributes {
    pub display: DisplayGeometry,
    pub locale: String,
    pub timezone_offset_minutes: i32,
    pub logical_cores: u32,
    pub timestamp_ms: u64,
}

impl EnvironmentAttributes {
    pub fn collect(host: &dyn HostEnvironment, clock: &dyn Clock) -> Self {
        Self {
            display: host.display_geometry().unwrap_or_default(),
            locale: host.locale().unwrap_or_default(),
            timezone_offset_minutes: host.timezone_offset_minutes().unwrap_or(0),
            logical_cores: host.logical_cores().unwrap_or(0),
            timestamp_ms: clock.now_ms(),
        }
    }

    fn canonical(&self) -> String {
        format!(
            "{}x{}x{}|{}|{}|{}|{}",
            self.display.width,
            self.display.height,
            self.display.color_depth,
            self.locale,
            self.timezone_offset_minutes,
            self.logical_cores,
            self.timestamp_ms
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionFingerprint(String);

impl SessionFingerprint {
    pub fn from_attributes(attrs: &EnvironmentAttributes) -> Self {
        let hash = rolling_hash(&attrs.canonical());
        Self(to_base36(hash.unsigned_abs()).to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint for the current session, salted with the clock.
pub fn generate(host: &dyn HostEnvironment, clock: &dyn Clock) -> SessionFingerprint {
    SessionFingerprint::from_attributes(&EnvironmentAttributes::collect(host, clock))
}

/// `hash = hash * 31 + unit` over UTF-16 code units, i32 wraparound.
pub fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_mul(31).wrapping_add(i32::from(unit))
    })
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(7);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
