use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

const SIGNAL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    InspectionTool,
    CaptureAttempt,
    TamperHeartbeat,
    VisibilityAnomaly,
    ClipboardImage,
    DisplayCaptureRequest,
}

/// Presentation tier of a violation. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Overlay window for this tier, as a multiple of the configured decay.
    pub fn window_ms(self, decay_ms: u64) -> u64 {
        let tenths = match self {
            Severity::Low => 10,
            Severity::Medium => 25,
            Severity::High => 50,
            Severity::Critical => 100,
        };
        decay_ms.saturating_mul(tenths) / 10
    }
}

impl ViolationKind {
    pub const ALL: [ViolationKind; 6] = [
        ViolationKind::InspectionTool,
        ViolationKind::CaptureAttempt,
        ViolationKind::TamperHeartbeat,
        ViolationKind::VisibilityAnomaly,
        ViolationKind::ClipboardImage,
        ViolationKind::DisplayCaptureRequest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ViolationKind::InspectionTool => "inspection-tool",
            ViolationKind::CaptureAttempt => "capture-attempt",
            ViolationKind::TamperHeartbeat => "tamper-heartbeat",
            ViolationKind::VisibilityAnomaly => "visibility-anomaly",
            ViolationKind::ClipboardImage => "clipboard-image",
            ViolationKind::DisplayCaptureRequest => "display-capture-request",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            ViolationKind::CaptureAttempt
            | ViolationKind::ClipboardImage
            | ViolationKind::DisplayCaptureRequest => Severity::Low,
            ViolationKind::VisibilityAnomaly => Severity::Medium,
            ViolationKind::TamperHeartbeat => Severity::High,
            ViolationKind::InspectionTool => Severity::Critical,
        }
    }

    /// Message shown on the protection overlay.
    pub fn reason(self) -> &'static str {
        match self {
            ViolationKind::InspectionTool => "Developer tools detected. Close them to continue viewing.",
            ViolationKind::CaptureAttempt => "Screen capture is not permitted for this content.",
            ViolationKind::TamperHeartbeat => "Playback paused: protection integrity check failed.",
            ViolationKind::VisibilityAnomaly => "Repeated focus interruptions detected.",
            ViolationKind::ClipboardImage => "Copying images of this content is not permitted.",
            ViolationKind::DisplayCaptureRequest => "Screen sharing detected. This session is being logged.",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected violation. Serialized as `{"type": ..., "timestamp": ...}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationEvent {
    #[serde(rename = "type")]
    pub kind: ViolationKind,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ViolationEvent {
    pub fn new(kind: ViolationKind, timestamp: u64) -> Self {
        Self { kind, timestamp }
    }
}

/// Destination for violations produced by detectors and the heartbeat.
pub trait ViolationSink: Send + Sync {
    fn emit(&self, event: ViolationEvent);
}

impl<F> ViolationSink for F
where
    F: Fn(ViolationEvent) + Send + Sync,
{
    fn emit(&self, event: ViolationEvent) {
        self(event)
    }
}

/// Broadcast channel any surface may listen on without coordination.
#[derive(Debug, Clone)]
pub struct SignalBus {
    tx: broadcast::Sender<ViolationEvent>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(SIGNAL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ViolationEvent> {
        self.tx.subscribe()
    }

    pub fn listeners(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl ViolationSink for SignalBus {
    fn emit(&self, event: ViolationEvent) {
        // no listeners is fine
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape_matches_signal_contract() {
        let event = ViolationEvent::new(ViolationKind::ClipboardImage, 1_700_000_000_123);
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "clipboard-image", "timestamp": 1_700_000_000_123u64})
        );
        let back: ViolationEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn kind_names_match_serde_names() {
        for kind in ViolationKind::ALL {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json.as_str(), Some(kind.as_str()));
        }
    }

    #[test]
    fn inspection_tool_outlasts_keyboard_attempts() {
        let decay = 2000;
        assert_eq!(ViolationKind::CaptureAttempt.severity().window_ms(decay), 2000);
        assert_eq!(ViolationKind::InspectionTool.severity().window_ms(decay), 20_000);
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn signal_bus_delivers_to_every_listener() {
        let bus = SignalBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.emit(ViolationEvent::new(ViolationKind::TamperHeartbeat, 5));
        assert_eq!(a.try_recv().unwrap().kind, ViolationKind::TamperHeartbeat);
        assert_eq!(b.try_recv().unwrap().timestamp, 5);
    }
}
