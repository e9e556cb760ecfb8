use serde::{Deserialize, Serialize};

use crate::events::{Severity, ViolationEvent};

pub const FOCUS_LOST_REASON: &str = "Content hidden while the window is not focused.";

/// What presentation layers render over protected media.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtectionOverlayState {
    pub visible: bool,
    pub reason: String,
    /// Expiry in ms since the epoch; `None` while held open by focus loss.
    pub armed_until: Option<u64>,
}

#[derive(Debug, Clone, Copy)]
struct Arming {
    event: ViolationEvent,
    severity: Severity,
    until: u64,
}

/// Single writer of [`ProtectionOverlayState`].
#[derive(Debug, Clone)]
pub(crate) struct OverlayController {
    decay_ms: u64,
    armed: Option<Arming>,
    focus_lost: bool,
}

impl OverlayController {
    pub(crate) fn new(decay_ms: u64) -> Self {
        Self {
            decay_ms,
            armed: None,
            focus_lost: false,
        }
    }

    pub(crate) fn set_decay(&mut self, decay_ms: u64) {
        self.decay_ms = decay_ms;
    }

    /// Arm for `event`. Returns false when a more severe arming is already
    /// showing and the event leaves presentation unchanged.
    pub(crate) fn arm(&mut self, event: ViolationEvent, now_ms: u64) -> bool {
        self.expire(now_ms);
        let severity = event.kind.severity();
        let until = now_ms.saturating_add(severity.window_ms(self.decay_ms));
        match &mut self.armed {
            Some(current) if severity < current.severity => false,
            Some(current) => {
                current.event = event;
                current.severity = severity;
                current.until = current.until.max(until);
                true
            }
            None => {
                self.armed = Some(Arming {
                    event,
                    severity,
                    until,
                });
                true
            }
        }
    }

    pub(crate) fn set_focus_lost(&mut self, lost: bool) {
        self.focus_lost = lost;
    }

    pub(crate) fn clear(&mut self) {
        self.armed = None;
        self.focus_lost = false;
    }

    fn expire(&mut self, now_ms: u64) {
        if self.armed.is_some_and(|a| now_ms >= a.until) {
            self.armed = None;
        }
    }

    pub(crate) fn state(&mut self, now_ms: u64) -> ProtectionOverlayState {
        self.expire(now_ms);
        match (self.armed, self.focus_lost) {
            (Some(armed), _) => ProtectionOverlayState {
                visible: true,
                reason: armed.event.kind.reason().to_string(),
                armed_until: Some(armed.until),
            },
            (None, true) => ProtectionOverlayState {
                visible: true,
                reason: FOCUS_LOST_REASON.to_string(),
                armed_until: None,
            },
            (None, false) => ProtectionOverlayState::default(),
        }
    }
}
