use shield_core::detectors::{KeyEvent, MediaRequest, Verdict, Visibility};
use shield_core::events::{ViolationEvent, ViolationKind};
use shield_core::forensic::{self, WatermarkPayload};
use shield_core::host::{FrameMetrics, HeadlessHost, HostEnvironment};
use shield_core::storage::{FileStore, MemoryStore, CONFIG_KEY};
use shield_core::{
    LifecycleState, ManualClock, ManualScheduler, OrchestratorOptions, ProtectionConfig,
    ProtectionOrchestrator, SettingsBus, SignalBus,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;

struct Session {
    clock: ManualClock,
    scheduler: ManualScheduler,
    orchestrator: ProtectionOrchestrator,
}

fn session_with_host(host: Arc<dyn HostEnvironment>, start_ms: u64) -> Session {
    let clock = ManualClock::new(start_ms);
    let scheduler = ManualScheduler::new(clock.clone());
    let orchestrator =
        ProtectionOrchestrator::new(host, Arc::new(scheduler.clone()), Arc::new(clock.clone()));
    Session {
        clock,
        scheduler,
        orchestrator,
    }
}

fn session(start_ms: u64) -> Session {
    session_with_host(Arc::new(HeadlessHost), start_ms)
}

struct DockedTools;

impl HostEnvironment for DockedTools {
    fn frame_metrics(&self) -> Option<FrameMetrics> {
        Some(FrameMetrics {
            outer_width: 1920.0,
            inner_width: 1400.0,
            outer_height: 1080.0,
            inner_height: 1000.0,
        })
    }
}

#[test]
fn teardown_is_idempotent_and_silences_everything() {
    let s = session(0);
    s.orchestrator.init(ProtectionConfig::default()).unwrap();
    let mut rx = s.orchestrator.subscribe_violations();

    s.orchestrator.teardown();
    s.orchestrator.teardown();
    assert_eq!(s.orchestrator.state(), LifecycleState::TornDown);
    assert_eq!(s.scheduler.active_timers(), 0);

    assert_eq!(
        s.orchestrator.on_key_down(&KeyEvent::key("PrintScreen")),
        Verdict::Allow
    );
    assert_eq!(s.orchestrator.on_clipboard_write(&["image/png"]), Verdict::Allow);
    assert_eq!(
        s.orchestrator.on_media_request(MediaRequest::Recorder),
        Verdict::Allow
    );
    assert_eq!(s.orchestrator.on_context_menu(), Verdict::Allow);
    for _ in 0..3 {
        s.orchestrator.on_visibility_change(Visibility::Hidden);
        s.clock.advance(100);
        s.orchestrator.on_visibility_change(Visibility::Visible);
    }
    s.orchestrator.on_focus_change(false);
    for _ in 0..5 {
        s.scheduler.stall(10_000);
    }
    s.orchestrator
        .apply_config(ProtectionConfig::disabled())
        .unwrap();

    assert!(s.orchestrator.violations().is_empty());
    assert!(rx.try_recv().is_err());
    assert!(!s.orchestrator.overlay().visible);
}

#[test]
fn leak_attribution_recovers_viewer_identity() {
    let payload = WatermarkPayload::new("U42").unwrap();
    let overlay = forensic::encode(&payload, 256, 256);
    assert_eq!(forensic::decode(&overlay), "U42");

    let s = session(5_000);
    s.orchestrator.init(ProtectionConfig::default()).unwrap();
    let overlay = s.orchestrator.forensic_overlay_for(&payload, 256, 256).unwrap();
    assert_eq!(forensic::decode(&overlay), "U42");
}

#[test]
fn debugger_pause_raises_tamper_heartbeat() {
    let s = session(0);
    let mut config = ProtectionConfig::default();
    config.dev_tools_detection = false;
    s.orchestrator.init(config).unwrap();
    let mut rx = s.orchestrator.subscribe_violations();

    s.scheduler.advance(10_000);
    assert!(s.orchestrator.violations().is_empty());

    for _ in 0..3 {
        s.scheduler.stall(4_000);
    }
    let expected = ViolationEvent::new(ViolationKind::TamperHeartbeat, 22_000);
    assert_eq!(s.orchestrator.violations(), vec![expected]);
    assert_eq!(rx.try_recv().unwrap(), expected);

    let overlay = s.orchestrator.overlay();
    assert!(overlay.visible);
    assert_eq!(overlay.reason, ViolationKind::TamperHeartbeat.reason());
    assert_eq!(overlay.armed_until, Some(32_000));
}

#[test]
fn settings_converge_across_surfaces() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()).unwrap());
    let bus = SettingsBus::new(store.clone());
    bus.bootstrap().unwrap();

    let mut initial = bus.current();
    initial.screenshot_blocking = false;
    bus.publish(initial).unwrap();

    let viewer = session(0);
    viewer.orchestrator.init(ProtectionConfig::default()).unwrap();
    let surface_b = bus.clone();
    viewer.orchestrator.attach_settings_bus(&surface_b);
    assert!(!viewer.orchestrator.config().screenshot_blocking);
    assert_eq!(
        viewer.orchestrator.on_key_down(&KeyEvent::key("PrintScreen")),
        Verdict::Allow
    );

    let surface_a = bus.clone();
    let mut update = surface_a.current();
    update.screenshot_blocking = true;
    surface_a.publish(update).unwrap();

    assert!(viewer.orchestrator.config().screenshot_blocking);
    assert_eq!(
        viewer.orchestrator.on_key_down(&KeyEvent::key("PrintScreen").ctrl().shift()),
        Verdict::Suppress
    );
    assert!(store.path_for(CONFIG_KEY).exists());
}

#[test]
fn overlay_keeps_the_most_severe_reason() {
    let s = session_with_host(Arc::new(DockedTools), 0);
    s.orchestrator.init(ProtectionConfig::default()).unwrap();

    s.scheduler.advance(1_000);
    let overlay = s.orchestrator.overlay();
    assert_eq!(overlay.reason, ViolationKind::InspectionTool.reason());
    assert_eq!(overlay.armed_until, Some(21_000));

    s.orchestrator.on_key_down(&KeyEvent::key("PrintScreen"));
    let overlay = s.orchestrator.overlay();
    assert_eq!(overlay.reason, ViolationKind::InspectionTool.reason());
    assert_eq!(overlay.armed_until, Some(21_000));

    let kinds: Vec<_> = s.orchestrator.violations().iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![ViolationKind::InspectionTool, ViolationKind::CaptureAttempt]
    );
}

#[test]
fn rapid_visibility_flips_raise_one_anomaly() {
    let s = session(0);
    let mut config = ProtectionConfig::default();
    config.dev_tools_detection = false;
    config.heartbeat_protection = false;
    s.orchestrator.init(config).unwrap();

    s.orchestrator.on_visibility_change(Visibility::Hidden);
    s.clock.advance(5_000);
    s.orchestrator.on_visibility_change(Visibility::Visible);
    for _ in 0..3 {
        s.clock.advance(1_000);
        s.orchestrator.on_visibility_change(Visibility::Hidden);
        s.clock.advance(120);
        s.orchestrator.on_visibility_change(Visibility::Visible);
    }
    let events = s.orchestrator.violations();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, ViolationKind::VisibilityAnomaly);
}

#[test]
fn handles_share_one_session() {
    let s = session(0);
    let other = s.orchestrator.clone();
    s.orchestrator.init(ProtectionConfig::default()).unwrap();
    assert_eq!(other.state(), LifecycleState::Active);
    other.on_clipboard_write(&["image/jpeg"]);
    assert_eq!(s.orchestrator.violations().len(), 1);
    other.teardown();
    assert_eq!(s.orchestrator.state(), LifecycleState::TornDown);
}

#[test]
fn memory_backed_bus_survives_corrupt_records() {
    use shield_core::storage::ConfigStore;
    let store = Arc::new(MemoryStore::new());
    store.write(CONFIG_KEY, "{\"screenshotBlocking\": \"yes\"").unwrap();
    let bus = SettingsBus::new(store);
    assert_eq!(bus.current(), ProtectionConfig::default());
}

#[test]
fn independently_mounted_surfaces_share_policy() {
    let store = Arc::new(MemoryStore::new());
    let viewer = session(0);
    viewer.orchestrator.init(ProtectionConfig::default()).unwrap();
    let viewer_bus = SettingsBus::new(store.clone());
    viewer.orchestrator.attach_settings_bus(&viewer_bus);

    let settings_page = SettingsBus::new(store);
    let mut update = settings_page.current();
    update.right_click_block = false;
    settings_page.publish(update.clone()).unwrap();

    assert_eq!(viewer_bus.current(), update);
    assert_eq!(viewer.orchestrator.config(), update);
    assert_eq!(viewer.orchestrator.on_context_menu(), Verdict::Allow);
}

#[test]
fn file_store_carries_policy_between_separate_mounts() {
    let dir = tempdir().unwrap();
    let viewer = session(0);
    viewer.orchestrator.init(ProtectionConfig::default()).unwrap();
    let viewer_bus = SettingsBus::new(Arc::new(FileStore::new(dir.path()).unwrap()));
    viewer_bus.bootstrap().unwrap();
    viewer.orchestrator.attach_settings_bus(&viewer_bus);

    let operator = SettingsBus::new(Arc::new(FileStore::new(dir.path()).unwrap()));
    let mut update = operator.current();
    update.screenshot_blocking = false;
    operator.publish(update).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while viewer.orchestrator.config().screenshot_blocking && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(!viewer.orchestrator.config().screenshot_blocking);
    assert_eq!(
        viewer.orchestrator.on_key_down(&KeyEvent::key("PrintScreen")),
        Verdict::Allow
    );
}

#[test]
fn page_listener_hears_every_viewer_on_a_shared_channel() {
    let signals = SignalBus::new();
    let mut audit = signals.subscribe();
    let clock = ManualClock::new(1_000);
    let scheduler = ManualScheduler::new(clock.clone());
    let viewer = ProtectionOrchestrator::with_options(
        Arc::new(HeadlessHost),
        Arc::new(scheduler),
        Arc::new(clock),
        OrchestratorOptions {
            signals: Some(signals.clone()),
            ..OrchestratorOptions::default()
        },
    );
    viewer.init(ProtectionConfig::default()).unwrap();
    viewer.on_key_down(&KeyEvent::key("PrintScreen"));

    assert_eq!(
        audit.try_recv().unwrap(),
        ViolationEvent::new(ViolationKind::CaptureAttempt, 1_000)
    );
    let mut late = viewer.subscribe_violations();
    viewer.on_clipboard_write(&["image/png"]);
    assert_eq!(late.try_recv().unwrap().kind, ViolationKind::ClipboardImage);
    assert_eq!(audit.try_recv().unwrap().kind, ViolationKind::ClipboardImage);
}
