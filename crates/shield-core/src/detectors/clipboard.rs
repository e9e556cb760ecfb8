use super::Verdict;
use crate::events::{ViolationEvent, ViolationKind};

#[derive(Debug, Clone, Default)]
pub struct ClipboardDetector;

impl ClipboardDetector {
    /// Inspect the MIME types offered by a clipboard write.
    pub fn on_clipboard_write<S: AsRef<str>>(
        &self,
        mime_types: &[S],
        now_ms: u64,
    ) -> (Verdict, Option<ViolationEvent>) {
        let has_image = mime_types
            .iter()
            .any(|mime| mime.as_ref().trim().to_ascii_lowercase().starts_with("image/"));
        if has_image {
            (
                Verdict::Suppress,
                Some(ViolationEvent::new(ViolationKind::ClipboardImage, now_ms)),
            )
        } else {
            (Verdict::Allow, None)
        }
    }
}
