//! Darklock Shield content protection engine.
//!
//! Session fingerprinting, forensic and visible watermarking, violation
//! heuristics, heartbeat tamper detection and the orchestrator that ties
//! them into one protected viewing session. Policy travels between
//! surfaces on the [`bus::SettingsBus`].

pub mod bus;
pub mod clock;
pub mod detectors;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod forensic;
pub mod heartbeat;
pub mod host;
pub mod orchestrator;
pub mod overlay;
pub mod scheduler;
pub mod settings;
pub mod storage;
pub mod tiling;

pub use bus::{SettingsBus, Subscription};
pub use clock::{Clock, ManualClock, SystemClock};
pub use detectors::{KeyEvent, MediaRequest, Verdict, Visibility};
pub use error::{Result, ShieldError};
pub use events::{Severity, SignalBus, ViolationEvent, ViolationKind, ViolationSink};
pub use fingerprint::SessionFingerprint;
pub use forensic::{PixelBuffer, WatermarkPayload};
pub use heartbeat::HeartbeatMonitor;
pub use host::{HeadlessHost, HostEnvironment, ProcessHost};
pub use orchestrator::{LifecycleState, OrchestratorOptions, ProtectionOrchestrator, ViolationReporter};
pub use overlay::ProtectionOverlayState;
pub use scheduler::{ManualScheduler, Scheduler, TokioScheduler};
pub use settings::ProtectionConfig;
pub use storage::{ConfigStore, FileStore, MemoryStore, StoreWatch};
pub use tiling::{TileLayout, VisibleWatermark};
