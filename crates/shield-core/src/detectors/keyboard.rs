use serde::{Deserialize, Serialize};

use super::Verdict;
use crate::events::{ViolationEvent, ViolationKind};

/// A key-down as delivered by the host, using DOM `key`/`code` naming.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeyEvent {
    pub key: String,
    pub code: String,
    pub ctrl: bool,
    pub meta: bool,
    pub shift: bool,
    pub alt: bool,
}

impl KeyEvent {
    pub fn key(key: &str) -> Self {
        Self {
            key: key.to_string(),
            ..Self::default()
        }
    }

    pub fn with_code(mut self, code: &str) -> Self {
        self.code = code.to_string();
        self
    }

    pub fn ctrl(mut self) -> Self {
        self.ctrl = true;
        self
    }

    pub fn meta(mut self) -> Self {
        self.meta = true;
        self
    }

    pub fn shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

const CAPTURE_KEYS: [&str; 3] = ["PrintScreen", "Print", "Snapshot"];
// shift turns the digit keys into symbols on US layouts
const SHOT_TOOL_KEYS: [(&str, &str); 3] = [("3", "#"), ("4", "$"), ("5", "%")];
const SHOT_TOOL_CODES: [&str; 3] = ["Digit3", "Digit4", "Digit5"];

pub fn is_capture_combo(event: &KeyEvent) -> bool {
    if CAPTURE_KEYS.contains(&event.key.as_str()) || event.code == "PrintScreen" {
        return true;
    }
    if !(event.shift && (event.ctrl || event.meta)) {
        return false;
    }
    if event.key.eq_ignore_ascii_case("s") || event.code == "KeyS" {
        return true;
    }
    SHOT_TOOL_KEYS
        .iter()
        .any(|(digit, symbol)| event.key == *digit || event.key == *symbol)
        || SHOT_TOOL_CODES.contains(&event.code.as_str())
}

#[derive(Debug, Clone, Default)]
pub struct KeyboardDetector;

impl KeyboardDetector {
    pub fn on_key_down(&self, event: &KeyEvent, now_ms: u64) -> (Verdict, Option<ViolationEvent>) {
        if is_capture_combo(event) {
            (
                Verdict::Suppress,
                Some(ViolationEvent::new(ViolationKind::CaptureAttempt, now_ms)),
            )
        } else {
            (Verdict::Allow, None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_combinations_are_capture_attempts() {
        let combos = [
            KeyEvent::key("PrintScreen"),
            KeyEvent::key("Print"),
            KeyEvent::key("Unidentified").with_code("PrintScreen"),
            KeyEvent::key("S").ctrl().shift(),
            KeyEvent::key("s").meta().shift(),
            KeyEvent::key("#").meta().shift().with_code("Digit3"),
            KeyEvent::key("$").meta().shift(),
            KeyEvent::key("5").ctrl().shift(),
            KeyEvent::key("§").meta().shift().with_code("Digit4"),
        ];
        for combo in combos {
            assert!(is_capture_combo(&combo), "{combo:?}");
        }
    }

    #[test]
    fn unrelated_keys_pass_through() {
        let keys = [
            KeyEvent::key("A"),
            KeyEvent::key("s").ctrl(),
            KeyEvent::key("S").shift(),
            KeyEvent::key("3").meta(),
            KeyEvent::key("6").meta().shift(),
        ];
        for key in keys {
            assert!(!is_capture_combo(&key), "{key:?}");
        }
    }

    #[test]
    fn capture_attempt_is_suppressed_and_reported() {
        let (verdict, event) = KeyboardDetector.on_key_down(&KeyEvent::key("PrintScreen"), 77);
        assert_eq!(verdict, Verdict::Suppress);
        assert_eq!(event, Some(ViolationEvent::new(ViolationKind::CaptureAttempt, 77)));
        let (verdict, event) = KeyboardDetector.on_key_down(&KeyEvent::key("A"), 78);
        assert_eq!(verdict, Verdict::Allow);
        assert!(event.is_none());
    }
}
