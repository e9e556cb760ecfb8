//! Protection lifecycle.
//!
//! One [`ProtectionOrchestrator`] per protected viewing session. It owns the
//! detectors and the heartbeat, consumes every violation they raise and is
//! the single writer of the overlay state. The lifecycle is
//! `Uninitialized -> Active -> TornDown`; once torn down every method is a
//! silent no-op.
//!
//! Violations flow through a hub that records them, arms the overlay, fans
//! them out on the signal bus and hands them to an optional reporter. The
//! hub drops anything that arrives after teardown.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bus::{SettingsBus, Subscription};
use crate::clock::Clock;
use crate::detectors::{HeuristicThresholds, HeuristicsEngine, KeyEvent, MediaRequest, Verdict, Visibility};
use crate::error::Result;
use crate::events::{SignalBus, ViolationEvent, ViolationSink};
use crate::fingerprint::{self, SessionFingerprint};
use crate::forensic::{self, PixelBuffer, WatermarkPayload};
use crate::heartbeat::HeartbeatMonitor;
use crate::host::HostEnvironment;
use crate::overlay::{OverlayController, ProtectionOverlayState};
use crate::scheduler::Scheduler;
use crate::settings::{ProtectionConfig, DEFAULT_VIOLATION_DECAY_MS};
use crate::tiling::{self, TileLayout, VisibleWatermark};

/// Most recent violations kept for [`ProtectionOrchestrator::violations`].
pub const HISTORY_LIMIT: usize = 512;

/// External sink for violations, e.g. an audit log. Called synchronously on
/// the emitting path; implementations must not call back into the
/// orchestrator.
pub trait ViolationReporter: Send + Sync {
    fn report(&self, event: &ViolationEvent);
}

impl<F> ViolationReporter for F
where
    F: Fn(&ViolationEvent) + Send + Sync,
{
    fn report(&self, event: &ViolationEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Active,
    TornDown,
}

#[derive(Clone, Default)]
pub struct OrchestratorOptions {
    pub thresholds: HeuristicThresholds,
    pub reporter: Option<Arc<dyn ViolationReporter>>,
    /// Page-wide violation channel to emit on. Orchestrators given clones of
    /// one bus share it with every other listener; a private bus is made
    /// when unset.
    pub signals: Option<SignalBus>,
}

struct ViolationHub {
    active: AtomicBool,
    clock: Arc<dyn Clock>,
    overlay: Mutex<OverlayController>,
    history: Mutex<VecDeque<ViolationEvent>>,
    signals: SignalBus,
    reporter: Option<Arc<dyn ViolationReporter>>,
}

impl ViolationSink for ViolationHub {
    fn emit(&self, event: ViolationEvent) {
        if !self.active.load(Ordering::SeqCst) {
            debug!(kind = %event.kind, "violation after teardown dropped");
            return;
        }
        {
            let mut history = self.history.lock();
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event);
        }
        let armed = self.overlay.lock().arm(event, self.clock.now_ms());
        warn!(kind = %event.kind, timestamp = event.timestamp, armed, "protection violation");
        self.signals.emit(event);
        if let Some(reporter) = &self.reporter {
            reporter.report(&event);
        }
    }
}

struct Core {
    state: LifecycleState,
    config: ProtectionConfig,
    fingerprint: Option<SessionFingerprint>,
    engine: Option<HeuristicsEngine>,
    heartbeat: Option<HeartbeatMonitor>,
    settings: Option<Subscription>,
}

struct Inner {
    core: Mutex<Core>,
    hub: Arc<ViolationHub>,
    host: Arc<dyn HostEnvironment>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    thresholds: HeuristicThresholds,
}

/// Cloned handles drive the same session.
#[derive(Clone)]
pub struct ProtectionOrchestrator {
    inner: Arc<Inner>,
}

impl ProtectionOrchestrator {
    pub fn new(
        host: Arc<dyn HostEnvironment>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_options(host, scheduler, clock, OrchestratorOptions::default())
    }

    pub fn with_options(
        host: Arc<dyn HostEnvironment>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        options: OrchestratorOptions,
    ) -> Self {
        let hub = Arc::new(ViolationHub {
            active: AtomicBool::new(false),
            clock: clock.clone(),
            overlay: Mutex::new(OverlayController::new(DEFAULT_VIOLATION_DECAY_MS)),
            history: Mutex::new(VecDeque::new()),
            signals: options.signals.unwrap_or_default(),
            reporter: options.reporter,
        });
        Self {
            inner: Arc::new(Inner {
                core: Mutex::new(Core {
                    state: LifecycleState::Uninitialized,
                    config: ProtectionConfig::default(),
                    fingerprint: None,
                    engine: None,
                    heartbeat: None,
                    settings: None,
                }),
                hub,
                host,
                scheduler,
                clock,
                thresholds: options.thresholds,
            }),
        }
    }

    /// Start protecting with `config`. Only acts on an uninitialized
    /// orchestrator; later calls are ignored.
    pub fn init(&self, config: ProtectionConfig) -> Result<()> {
        config.validate()?;
        let inner = &self.inner;
        let mut core = inner.core.lock();
        if core.state != LifecycleState::Uninitialized {
            debug!(state = ?core.state, "init ignored");
            return Ok(());
        }
        let fingerprint = fingerprint::generate(inner.host.as_ref(), inner.clock.as_ref());
        inner.hub.overlay.lock().set_decay(config.violation_decay_ms);
        inner.hub.active.store(true, Ordering::SeqCst);
        core.engine = Some(inner.start_engine(&config));
        core.heartbeat = inner.start_heartbeat(&config);
        core.config = config;
        core.state = LifecycleState::Active;
        info!(fingerprint = %fingerprint, "protection active");
        core.fingerprint = Some(fingerprint);
        Ok(())
    }

    /// Replace the running policy. Re-applying the current config does
    /// nothing, so surfaces that publish and subscribe can echo their own
    /// writes. Detector state restarts when the engine is rebuilt.
    pub fn apply_config(&self, config: ProtectionConfig) -> Result<()> {
        config.validate()?;
        self.inner.apply_config(config);
        Ok(())
    }

    /// Follow `bus` for policy changes, applying its current config now.
    /// Replaces any bus attached earlier.
    pub fn attach_settings_bus(&self, bus: &SettingsBus) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let mut core = self.inner.core.lock();
        if core.state == LifecycleState::TornDown {
            return;
        }
        let subscription = bus.subscribe(move |config: &ProtectionConfig| {
            if let Some(inner) = weak.upgrade() {
                inner.apply_config(config.clone());
            }
        });
        if let Some(previous) = core.settings.replace(subscription) {
            previous.unsubscribe();
        }
        drop(core);
        self.inner.apply_config(bus.current());
    }

    /// Stop every detector and the heartbeat and release all listeners.
    /// Safe to call any number of times.
    pub fn teardown(&self) {
        let (engine, heartbeat, settings) = {
            let mut core = self.inner.core.lock();
            if core.state == LifecycleState::TornDown {
                return;
            }
            self.inner.hub.active.store(false, Ordering::SeqCst);
            core.state = LifecycleState::TornDown;
            (core.engine.take(), core.heartbeat.take(), core.settings.take())
        };
        // stopped outside the core lock: a beat still delivering may call a
        // reporter that reads this orchestrator
        if let Some(mut engine) = engine {
            engine.stop();
        }
        if let Some(mut heartbeat) = heartbeat {
            heartbeat.stop();
        }
        if let Some(subscription) = settings {
            subscription.unsubscribe();
        }
        self.inner.hub.overlay.lock().clear();
        info!("protection torn down");
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.core.lock().state
    }

    pub fn config(&self) -> ProtectionConfig {
        self.inner.core.lock().config.clone()
    }

    pub fn fingerprint(&self) -> Option<SessionFingerprint> {
        self.inner.core.lock().fingerprint.clone()
    }

    pub fn overlay(&self) -> ProtectionOverlayState {
        let now = self.inner.clock.now_ms();
        self.inner.hub.overlay.lock().state(now)
    }

    pub fn subscribe_violations(&self) -> broadcast::Receiver<ViolationEvent> {
        self.inner.hub.signals.subscribe()
    }

    /// Recorded violations, oldest first.
    pub fn violations(&self) -> Vec<ViolationEvent> {
        self.inner.hub.history.lock().iter().copied().collect()
    }

    pub fn on_key_down(&self, event: &KeyEvent) -> Verdict {
        match self.inner.core.lock().engine.as_mut() {
            Some(engine) => engine.on_key_down(event),
            None => Verdict::Allow,
        }
    }

    pub fn on_clipboard_write<S: AsRef<str>>(&self, mime_types: &[S]) -> Verdict {
        match self.inner.core.lock().engine.as_mut() {
            Some(engine) => engine.on_clipboard_write(mime_types),
            None => Verdict::Allow,
        }
    }

    pub fn on_visibility_change(&self, visibility: Visibility) {
        if let Some(engine) = self.inner.core.lock().engine.as_mut() {
            engine.on_visibility_change(visibility);
        }
    }

    pub fn on_media_request(&self, request: MediaRequest) -> Verdict {
        match self.inner.core.lock().engine.as_mut() {
            Some(engine) => engine.on_media_request(request),
            None => Verdict::Allow,
        }
    }

    pub fn on_context_menu(&self) -> Verdict {
        match self.inner.core.lock().engine.as_ref() {
            Some(engine) => engine.on_context_menu(),
            None => Verdict::Allow,
        }
    }

    /// Window focus transitions. With focus protection on, losing focus
    /// hides the content until focus returns.
    pub fn on_focus_change(&self, focused: bool) {
        let core = self.inner.core.lock();
        if core.state == LifecycleState::Active && core.config.focus_protection {
            self.inner.hub.overlay.lock().set_focus_lost(!focused);
        }
    }

    /// Forensic overlay carrying the session fingerprint.
    pub fn forensic_overlay(&self, width: u32, height: u32) -> Option<PixelBuffer> {
        let fingerprint = self.fingerprint()?;
        let payload = WatermarkPayload::new(fingerprint.as_str()).ok()?;
        self.forensic_overlay_for(&payload, width, height)
    }

    /// Forensic overlay carrying `payload`, when the policy enables it.
    pub fn forensic_overlay_for(
        &self,
        payload: &WatermarkPayload,
        width: u32,
        height: u32,
    ) -> Option<PixelBuffer> {
        {
            let core = self.inner.core.lock();
            if core.state != LifecycleState::Active || !core.config.forensic_watermark {
                return None;
            }
        }
        if !forensic::fits(payload, width, height) {
            warn!(width, height, "raster too small for the full watermark frame");
        }
        Some(forensic::encode(payload, width, height))
    }

    pub fn visible_watermark_layout(
        &self,
        width: f64,
        height: f64,
        watermark: &VisibleWatermark,
    ) -> Option<TileLayout> {
        let core = self.inner.core.lock();
        if core.state != LifecycleState::Active || !core.config.visible_watermark {
            return None;
        }
        Some(tiling::layout(width, height, watermark))
    }
}

impl Inner {
    fn start_engine(&self, config: &ProtectionConfig) -> HeuristicsEngine {
        let sink: Arc<dyn ViolationSink> = self.hub.clone();
        let mut engine = HeuristicsEngine::new(
            config.clone(),
            self.thresholds,
            self.clock.clone(),
            sink,
        );
        engine.start(self.host.clone(), self.scheduler.as_ref());
        engine
    }

    fn start_heartbeat(&self, config: &ProtectionConfig) -> Option<HeartbeatMonitor> {
        if !config.heartbeat_protection {
            return None;
        }
        let sink: Arc<dyn ViolationSink> = self.hub.clone();
        let mut monitor =
            HeartbeatMonitor::new(self.scheduler.clone(), self.clock.clone(), sink, None);
        monitor.start(Duration::from_millis(config.heartbeat_interval_ms));
        Some(monitor)
    }

    fn apply_config(&self, config: ProtectionConfig) {
        if let Err(err) = config.validate() {
            warn!(error = %err, "rejected protection config");
            return;
        }
        let mut core = self.core.lock();
        if core.state != LifecycleState::Active || core.config == config {
            return;
        }
        if let Some(mut engine) = core.engine.take() {
            engine.stop();
        }
        core.engine = Some(self.start_engine(&config));

        let heartbeat_changed = core.config.heartbeat_protection != config.heartbeat_protection
            || core.config.heartbeat_interval_ms != config.heartbeat_interval_ms;
        if heartbeat_changed {
            if let Some(mut heartbeat) = core.heartbeat.take() {
                heartbeat.stop();
            }
            core.heartbeat = self.start_heartbeat(&config);
        }

        {
            let mut overlay = self.hub.overlay.lock();
            overlay.set_decay(config.violation_decay_ms);
            if !config.focus_protection {
                overlay.set_focus_lost(false);
            }
        }
        info!(
            capture = config.screenshot_blocking,
            inspection = config.dev_tools_detection,
            heartbeat = config.heartbeat_protection,
            "protection config applied"
        );
        core.config = config;
    }
}
