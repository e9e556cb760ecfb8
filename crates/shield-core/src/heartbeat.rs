//! Heartbeat tamper monitor.
//!
//! A debugger breakpoint stalls the host's task queue, so a timer that
//! should fire every `T` fires late. Three consecutive gaps longer than
//! `3T` raise `tamper-heartbeat`. Short GC pauses stay under the bound and
//! backgrounded tabs are the visibility detector's concern.

use parking_lot::{Mutex, ReentrantMutex};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::events::{ViolationEvent, ViolationKind, ViolationSink};
use crate::scheduler::{Scheduler, TimerHandle};

pub const STALL_FACTOR: u64 = 3;
pub const MISSED_BEAT_LIMIT: u32 = 3;

pub type ViolationCallback = Arc<dyn Fn(ViolationEvent) + Send + Sync>;

#[derive(Debug, Default)]
struct BeatState {
    running: bool,
    interval_ms: u64,
    last_beat: Option<u64>,
    missed: u32,
}

struct Pulse {
    state: Mutex<BeatState>,
    /// Held for a whole beat, delivery included. Reentrant so a callback may
    /// stop the monitor that invoked it.
    delivery: ReentrantMutex<()>,
    sink: Arc<dyn ViolationSink>,
    on_violation: Option<ViolationCallback>,
}

impl Pulse {
    fn beat(&self, now_ms: u64) -> Option<ViolationEvent> {
        let _delivery = self.delivery.lock();
        let event = {
            let mut state = self.state.lock();
            if !state.running {
                return None;
            }
            let previous = state.last_beat.replace(now_ms);
            let gap = previous.map(|p| now_ms.saturating_sub(p)).unwrap_or(0);
            if gap > state.interval_ms * STALL_FACTOR {
                state.missed += 1;
                warn!(gap, missed = state.missed, "heartbeat drift");
            } else {
                state.missed = 0;
            }
            if state.missed < MISSED_BEAT_LIMIT {
                return None;
            }
            state.missed = 0;
            ViolationEvent::new(ViolationKind::TamperHeartbeat, now_ms)
        };
        self.sink.emit(event);
        if let Some(callback) = &self.on_violation {
            callback(event);
        }
        Some(event)
    }
}

pub struct HeartbeatMonitor {
    pulse: Arc<Pulse>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    timer: Option<TimerHandle>,
}

impl HeartbeatMonitor {
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn ViolationSink>,
        on_violation: Option<ViolationCallback>,
    ) -> Self {
        Self {
            pulse: Arc::new(Pulse {
                state: Mutex::new(BeatState::default()),
                delivery: ReentrantMutex::new(()),
                sink,
                on_violation,
            }),
            clock,
            scheduler,
            timer: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.pulse.state.lock().running
    }

    pub fn missed_beats(&self) -> u32 {
        self.pulse.state.lock().missed
    }

    /// Start beating every `interval`. A running monitor is left alone.
    pub fn start(&mut self, interval: Duration) {
        let interval_ms = (interval.as_millis() as u64).max(1);
        {
            let mut state = self.pulse.state.lock();
            if state.running {
                return;
            }
            *state = BeatState {
                running: true,
                interval_ms,
                last_beat: Some(self.clock.now_ms()),
                missed: 0,
            };
        }
        let pulse = self.pulse.clone();
        let clock = self.clock.clone();
        self.timer = Some(self.scheduler.schedule_repeating(
            Duration::from_millis(interval_ms),
            Box::new(move || {
                pulse.beat(clock.now_ms());
            }),
        ));
        info!(interval_ms, "heartbeat started");
    }

    /// Stop beating. A beat already delivering on another thread finishes
    /// before this returns; no sink or callback call starts afterwards.
    /// Stopping a stopped monitor does nothing.
    pub fn stop(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.cancel();
        }
        {
            let mut state = self.pulse.state.lock();
            if state.running {
                state.running = false;
                info!("heartbeat stopped");
            }
        }
        drop(self.pulse.delivery.lock());
    }

    /// Record a beat at `now_ms`, for hosts that drive the tick themselves.
    pub fn beat(&self, now_ms: u64) -> Option<ViolationEvent> {
        self.pulse.beat(now_ms)
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
