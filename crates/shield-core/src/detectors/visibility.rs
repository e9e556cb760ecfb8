use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DetectorPhase, HeuristicThresholds};
use crate::events::{ViolationEvent, ViolationKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Hidden,
    Visible,
}

/// Counts hidden spells too short to be a real tab switch. Screenshot tools
/// blur the page for a few hundred milliseconds.
#[derive(Debug, Clone)]
pub struct VisibilityDetector {
    rapid_flip_ms: u64,
    limit: u32,
    hidden_since: Option<u64>,
    rapid_flips: u32,
    phase: DetectorPhase,
}

impl VisibilityDetector {
    pub fn new(thresholds: &HeuristicThresholds) -> Self {
        Self {
            rapid_flip_ms: thresholds.rapid_flip_ms,
            limit: thresholds.rapid_flip_limit.max(1),
            hidden_since: None,
            rapid_flips: 0,
            phase: DetectorPhase::Idle,
        }
    }

    pub fn phase(&self) -> DetectorPhase {
        self.phase
    }

    pub fn rapid_flips(&self) -> u32 {
        self.rapid_flips
    }

    pub fn on_change(&mut self, visibility: Visibility, now_ms: u64) -> Option<ViolationEvent> {
        match visibility {
            Visibility::Hidden => {
                self.hidden_since.get_or_insert(now_ms);
                None
            }
            Visibility::Visible => {
                let since = self.hidden_since.take()?;
                let hidden_for = now_ms.saturating_sub(since);
                if hidden_for >= self.rapid_flip_ms {
                    return None;
                }
                self.rapid_flips += 1;
                debug!(hidden_for, flips = self.rapid_flips, "rapid visibility flip");
                if self.rapid_flips < self.limit {
                    self.phase = DetectorPhase::Suspected;
                    return None;
                }
                self.rapid_flips = 0;
                self.phase = DetectorPhase::Confirmed;
                Some(ViolationEvent::new(ViolationKind::VisibilityAnomaly, now_ms))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flip(d: &mut VisibilityDetector, at: u64, hidden_for: u64) -> Option<ViolationEvent> {
        d.on_change(Visibility::Hidden, at);
        d.on_change(Visibility::Visible, at + hidden_for)
    }

    #[test]
    fn third_rapid_flip_emits() {
        let mut d = VisibilityDetector::new(&HeuristicThresholds::default());
        assert!(flip(&mut d, 0, 120).is_none());
        assert_eq!(d.phase(), DetectorPhase::Suspected);
        assert!(flip(&mut d, 1000, 80).is_none());
        let event = flip(&mut d, 2000, 300).unwrap();
        assert_eq!(event.kind, ViolationKind::VisibilityAnomaly);
        assert_eq!(event.timestamp, 2300);
        assert_eq!(d.phase(), DetectorPhase::Confirmed);
        assert_eq!(d.rapid_flips(), 0);
    }

    #[test]
    fn normal_tab_switches_do_not_count() {
        let mut d = VisibilityDetector::new(&HeuristicThresholds::default());
        for i in 0..10 {
            assert!(flip(&mut d, i * 10_000, 4_000).is_none());
        }
        assert_eq!(d.rapid_flips(), 0);
        assert_eq!(d.phase(), DetectorPhase::Idle);
    }

    #[test]
    fn visible_without_hidden_is_ignored() {
        let mut d = VisibilityDetector::new(&HeuristicThresholds::default());
        assert!(d.on_change(Visibility::Visible, 5).is_none());
        // a repeated hidden signal keeps the first timestamp
        d.on_change(Visibility::Hidden, 100);
        d.on_change(Visibility::Hidden, 900);
        d.on_change(Visibility::Visible, 1000);
        assert_eq!(d.rapid_flips(), 0);
    }
}
