use serde::{Deserialize, Serialize};

use super::Verdict;
use crate::events::{ViolationEvent, ViolationKind};

/// Media APIs a page can reach for to copy what is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaRequest {
    /// Screen share / display capture.
    DisplayCapture,
    /// A recorder constructed over a protected stream.
    Recorder,
    PictureInPicture,
}

/// Display capture has legitimate uses so it is let through and logged.
#[derive(Debug, Clone, Default)]
pub struct DisplayCaptureDetector;

impl DisplayCaptureDetector {
    pub fn on_request(&self, now_ms: u64) -> (Verdict, Option<ViolationEvent>) {
        (
            Verdict::Allow,
            Some(ViolationEvent::new(ViolationKind::DisplayCaptureRequest, now_ms)),
        )
    }
}
