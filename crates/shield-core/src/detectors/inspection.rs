use std::time::Duration;
use tracing::debug;

use super::{DetectorPhase, HeuristicThresholds};
use crate::events::{ViolationEvent, ViolationKind};
use crate::host::FrameMetrics;

/// Docked inspection tools shrink the inner viewport relative to the outer
/// window. A slow diagnostic probe on its own only raises suspicion.
#[derive(Debug, Clone)]
pub struct InspectionToolDetector {
    frame_delta: f64,
    probe_threshold: Duration,
    phase: DetectorPhase,
}

impl InspectionToolDetector {
    pub fn new(thresholds: &HeuristicThresholds) -> Self {
        Self {
            frame_delta: thresholds.frame_delta,
            probe_threshold: Duration::from_millis(thresholds.probe_ms),
            phase: DetectorPhase::Idle,
        }
    }

    pub fn phase(&self) -> DetectorPhase {
        self.phase
    }

    pub fn tick(
        &mut self,
        metrics: Option<FrameMetrics>,
        probe: Option<Duration>,
        now_ms: u64,
    ) -> Option<ViolationEvent> {
        let frame_hit = metrics
            .map(|m| m.width_delta() > self.frame_delta || m.height_delta() > self.frame_delta)
            .unwrap_or(false);
        let probe_hit = probe.map(|d| d > self.probe_threshold).unwrap_or(false);

        self.phase = match (frame_hit, probe_hit) {
            (true, _) => DetectorPhase::Confirmed,
            (false, true) => DetectorPhase::Suspected,
            (false, false) => DetectorPhase::Idle,
        };
        if probe_hit {
            debug!(?probe, confirmed = frame_hit, "diagnostic probe ran slow");
        }
        frame_hit.then(|| ViolationEvent::new(ViolationKind::InspectionTool, now_ms))
    }
}
