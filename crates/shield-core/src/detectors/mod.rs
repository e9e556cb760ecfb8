//! Violation detection heuristics.
//!
//! Each detector is an independent state machine fed by host signals. A
//! detector's only observable effect is the [`ViolationEvent`] it returns;
//! detectors never see each other. [`HeuristicsEngine`] owns one instance
//! of each, switched on by the protection config.
//!
//! Thresholds are tunable defaults. False positives are an accepted cost of
//! client-side heuristics and are dampened with corroboration or repetition,
//! never eliminated.
//!
//! [`ViolationEvent`]: crate::events::ViolationEvent

use serde::{Deserialize, Serialize};

pub mod clipboard;
pub mod engine;
pub mod inspection;
pub mod keyboard;
pub mod media;
pub mod visibility;

pub use clipboard::ClipboardDetector;
pub use engine::HeuristicsEngine;
pub use inspection::InspectionToolDetector;
pub use keyboard::{KeyEvent, KeyboardDetector};
pub use media::{DisplayCaptureDetector, MediaRequest};
pub use visibility::{Visibility, VisibilityDetector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorPhase {
    Idle,
    Suspected,
    Confirmed,
}

/// What the host should do with the intercepted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Allow,
    Suppress,
}

impl Verdict {
    pub fn is_suppressed(self) -> bool {
        matches!(self, Verdict::Suppress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeuristicThresholds {
    /// Outer minus inner frame size that indicates a docked tool panel.
    pub frame_delta: f64,
    /// Diagnostic call duration that corroborates an attached tool.
    pub probe_ms: u64,
    pub inspection_tick_ms: u64,
    /// Hidden spells shorter than this count as rapid flips.
    pub rapid_flip_ms: u64,
    pub rapid_flip_limit: u32,
}

impl Default for HeuristicThresholds {
    fn default() -> Self {
        Self {
            frame_delta: 160.0,
            probe_ms: 10,
            inspection_tick_ms: 1000,
            rapid_flip_ms: 500,
            rapid_flip_limit: 3,
        }
    }
}
