use serde::{Deserialize, Serialize};

use crate::error::{Result, ShieldError};

pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_VIOLATION_DECAY_MS: u64 = 2000;

const HEARTBEAT_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 100..=60_000;
const VIOLATION_DECAY_RANGE: std::ops::RangeInclusive<u64> = 500..=60_000;

/// Protection policy shared by every mounted viewer.
///
/// Replaced wholesale on update. Records persisted by older builds, or
/// written partially by hand, deserialize with the missing fields taken
/// from [`ProtectionConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtectionConfig {
    pub screenshot_blocking: bool,
    pub focus_protection: bool,
    pub dev_tools_detection: bool,
    pub right_click_block: bool,
    pub screen_record_block: bool,
    pub visible_watermark: bool,
    pub forensic_watermark: bool,
    pub recorder_api_block: bool,
    pub pip_block: bool,
    pub heartbeat_protection: bool,
    pub heartbeat_interval_ms: u64,
    pub violation_decay_ms: u64,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            screenshot_blocking: true,
            focus_protection: true,
            dev_tools_detection: true,
            right_click_block: true,
            screen_record_block: true,
            visible_watermark: true,
            forensic_watermark: true,
            recorder_api_block: true,
            pip_block: true,
            heartbeat_protection: true,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            violation_decay_ms: DEFAULT_VIOLATION_DECAY_MS,
        }
    }
}

impl ProtectionConfig {
    /// Every toggle off. Tuning values keep their defaults.
    pub fn disabled() -> Self {
        Self {
            screenshot_blocking: false,
            focus_protection: false,
            dev_tools_detection: false,
            right_click_block: false,
            screen_record_block: false,
            visible_watermark: false,
            forensic_watermark: false,
            recorder_api_block: false,
            pip_block: false,
            heartbeat_protection: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !HEARTBEAT_INTERVAL_RANGE.contains(&self.heartbeat_interval_ms) {
            return Err(ShieldError::InvalidConfig(format!(
                "heartbeat interval must be between {} and {} ms",
                HEARTBEAT_INTERVAL_RANGE.start(),
                HEARTBEAT_INTERVAL_RANGE.end()
            )));
        }
        if !VIOLATION_DECAY_RANGE.contains(&self.violation_decay_ms) {
            return Err(ShieldError::InvalidConfig(format!(
                "violation decay window must be between {} and {} ms",
                VIOLATION_DECAY_RANGE.start(),
                VIOLATION_DECAY_RANGE.end()
            )));
        }
        Ok(())
    }
}
