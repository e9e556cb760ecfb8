use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    ClipboardDetector, DetectorPhase, DisplayCaptureDetector, HeuristicThresholds,
    InspectionToolDetector, KeyEvent, KeyboardDetector, MediaRequest, Verdict, Visibility,
    VisibilityDetector,
};
use crate::clock::Clock;
use crate::events::{ViolationEvent, ViolationKind, ViolationSink};
use crate::host::HostEnvironment;
use crate::scheduler::{Scheduler, TimerHandle};
use crate::settings::ProtectionConfig;

/// One set of detectors per protected session, shared by every surface.
pub struct HeuristicsEngine {
    config: ProtectionConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn ViolationSink>,
    running: Arc<AtomicBool>,
    thresholds: HeuristicThresholds,
    keyboard: KeyboardDetector,
    clipboard: ClipboardDetector,
    visibility: VisibilityDetector,
    display: DisplayCaptureDetector,
    inspection: Arc<Mutex<InspectionToolDetector>>,
    inspection_timer: Option<TimerHandle>,
}

impl HeuristicsEngine {
    pub fn new(
        config: ProtectionConfig,
        thresholds: HeuristicThresholds,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ViolationSink>,
    ) -> Self {
        Self {
            config,
            clock,
            sink,
            running: Arc::new(AtomicBool::new(false)),
            keyboard: KeyboardDetector,
            clipboard: ClipboardDetector,
            visibility: VisibilityDetector::new(&thresholds),
            display: DisplayCaptureDetector,
            inspection: Arc::new(Mutex::new(InspectionToolDetector::new(&thresholds))),
            inspection_timer: None,
            thresholds,
        }
    }

    pub fn config(&self) -> &ProtectionConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Arm the detectors. Starting a running engine does nothing.
    pub fn start(&mut self, host: Arc<dyn HostEnvironment>, scheduler: &dyn Scheduler) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.config.dev_tools_detection {
            let inspection = self.inspection.clone();
            let clock = self.clock.clone();
            let sink = self.sink.clone();
            let running = self.running.clone();
            let interval = Duration::from_millis(self.thresholds.inspection_tick_ms.max(1));
            self.inspection_timer = Some(scheduler.schedule_repeating(
                interval,
                Box::new(move || {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    let event = inspection.lock().tick(
                        host.frame_metrics(),
                        host.time_diagnostic_probe(),
                        clock.now_ms(),
                    );
                    if let Some(event) = event {
                        sink.emit(event);
                    }
                }),
            ));
        }
        info!(
            capture = self.config.screenshot_blocking,
            inspection = self.config.dev_tools_detection,
            screen_record = self.config.screen_record_block,
            "heuristics engine started"
        );
    }

    /// Disarm every detector and cancel the inspection tick. Idempotent.
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(mut timer) = self.inspection_timer.take() {
            timer.cancel();
        }
        if was_running {
            info!("heuristics engine stopped");
        }
    }

    pub fn inspection_phase(&self) -> DetectorPhase {
        self.inspection.lock().phase()
    }

    pub fn visibility_phase(&self) -> DetectorPhase {
        self.visibility.phase()
    }

    fn dispatch(&self, event: Option<ViolationEvent>) {
        if let Some(event) = event {
            if self.is_running() {
                debug!(kind = %event.kind, "violation detected");
                self.sink.emit(event);
            }
        }
    }

    pub fn on_key_down(&mut self, event: &KeyEvent) -> Verdict {
        if !self.is_running() || !self.config.screenshot_blocking {
            return Verdict::Allow;
        }
        let (verdict, violation) = self.keyboard.on_key_down(event, self.clock.now_ms());
        self.dispatch(violation);
        verdict
    }

    pub fn on_clipboard_write<S: AsRef<str>>(&mut self, mime_types: &[S]) -> Verdict {
        if !self.is_running() || !self.config.screenshot_blocking {
            return Verdict::Allow;
        }
        let (verdict, violation) = self
            .clipboard
            .on_clipboard_write(mime_types, self.clock.now_ms());
        self.dispatch(violation);
        verdict
    }

    pub fn on_visibility_change(&mut self, visibility: Visibility) {
        if !self.is_running() || !self.config.screenshot_blocking {
            return;
        }
        let violation = self.visibility.on_change(visibility, self.clock.now_ms());
        self.dispatch(violation);
    }

    pub fn on_media_request(&mut self, request: MediaRequest) -> Verdict {
        if !self.is_running() {
            return Verdict::Allow;
        }
        let now = self.clock.now_ms();
        match request {
            MediaRequest::DisplayCapture if self.config.screen_record_block => {
                let (verdict, violation) = self.display.on_request(now);
                self.dispatch(violation);
                verdict
            }
            MediaRequest::Recorder if self.config.recorder_api_block => {
                self.dispatch(Some(ViolationEvent::new(ViolationKind::CaptureAttempt, now)));
                Verdict::Suppress
            }
            MediaRequest::PictureInPicture if self.config.pip_block => Verdict::Suppress,
            _ => Verdict::Allow,
        }
    }

    pub fn on_context_menu(&self) -> Verdict {
        if self.is_running() && self.config.right_click_block {
            Verdict::Suppress
        } else {
            Verdict::Allow
        }
    }
}

impl Drop for HeuristicsEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
