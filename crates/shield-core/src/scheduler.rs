//! Repeating timers on the host event loop.
//!
//! Detectors and the heartbeat never sleep: they register a repeating task
//! and return. [`TokioScheduler`] drives tasks from a tokio runtime;
//! [`ManualScheduler`] fires them only when a test advances its clock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::debug;

use crate::clock::{Clock, ManualClock};

pub type TimerTask = Box<dyn FnMut() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    /// Run `task` every `interval` until the returned handle is cancelled.
    fn schedule_repeating(&self, interval: Duration, task: TimerTask) -> TimerHandle;
}

/// Cancellation handle for a scheduled task.
///
/// Once [`TimerHandle::cancel`] returns the task is never invoked again.
/// Dropping the handle does not cancel.
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TimerHandle {
    pub(crate) fn new(cancelled: Arc<AtomicBool>, join: Option<JoinHandle<()>>) -> Self {
        Self { cancelled, join }
    }

    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Interval tasks on the ambient tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Binds to the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current()
            .ok()
            .map(|handle| Self { handle })
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_repeating(&self, interval: Duration, mut task: TimerTask) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let join = self.handle.spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            // a stalled loop fires once, late, like a browser timer
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                task();
            }
        });
        TimerHandle::new(cancelled, Some(join))
    }
}

struct ManualEntry {
    interval_ms: u64,
    next_due: u64,
    cancelled: Arc<AtomicBool>,
    task: Option<TimerTask>,
}

/// Deterministic scheduler for tests and headless replays.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: ManualClock,
    entries: Arc<Mutex<Vec<ManualEntry>>>,
}

impl ManualScheduler {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    /// Number of timers that have not been cancelled.
    pub fn active_timers(&self) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| !e.cancelled.load(Ordering::SeqCst))
            .count()
    }

    /// Move time forward by `ms`, firing every timer that falls due on the
    /// way, in due-time order.
    pub fn advance(&self, ms: u64) {
        let target = self.clock.now_ms() + ms;
        while let Some(due) = self.next_due_before(target) {
            self.clock.set(due);
            self.fire_due(due);
        }
        self.clock.set(target);
    }

    /// Simulate a blocked event loop: time jumps by `ms` with nothing
    /// running, then each overdue timer fires once and is rescheduled one
    /// interval after the stall.
    pub fn stall(&self, ms: u64) {
        let now = self.clock.advance(ms);
        self.fire_due(now);
    }

    fn next_due_before(&self, target: u64) -> Option<u64> {
        let mut entries = self.entries.lock();
        entries.retain(|e| !e.cancelled.load(Ordering::SeqCst));
        entries
            .iter()
            .map(|e| e.next_due)
            .filter(|due| *due <= target)
            .min()
    }

    fn fire_due(&self, now: u64) {
        let count = self.entries.lock().len();
        for index in 0..count {
            // the task runs without the lock held so it may schedule or cancel
            let (task, cancelled) = {
                let mut entries = self.entries.lock();
                let Some(entry) = entries.get_mut(index) else {
                    break;
                };
                if entry.next_due > now || entry.cancelled.load(Ordering::SeqCst) {
                    continue;
                }
                entry.next_due = now + entry.interval_ms;
                (entry.task.take(), entry.cancelled.clone())
            };
            let Some(mut task) = task else { continue };
            if !cancelled.load(Ordering::SeqCst) {
                task();
            }
            let mut entries = self.entries.lock();
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| Arc::ptr_eq(&e.cancelled, &cancelled))
            {
                entry.task = Some(task);
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_repeating(&self, interval: Duration, task: TimerTask) -> TimerHandle {
        let interval_ms = (interval.as_millis() as u64).max(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().push(ManualEntry {
            interval_ms,
            next_due: self.clock.now_ms() + interval_ms,
            cancelled: cancelled.clone(),
            task: Some(task),
        });
        debug!(interval_ms, "manual timer scheduled");
        TimerHandle::new(cancelled, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn manual_scheduler_fires_on_interval() {
        let scheduler = ManualScheduler::new(ManualClock::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let _handle = scheduler.schedule_repeating(Duration::from_millis(100), counter_task(&fired));
        scheduler.advance(99);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        scheduler.advance(1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        scheduler.advance(1000);
        assert_eq!(fired.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn cancelled_timer_never_fires_again() {
        let scheduler = ManualScheduler::new(ManualClock::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let mut handle =
            scheduler.schedule_repeating(Duration::from_millis(100), counter_task(&fired));
        scheduler.advance(250);
        handle.cancel();
        handle.cancel();
        scheduler.advance(1000);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.active_timers(), 0);
    }

    #[test]
    fn stall_fires_once_late() {
        let scheduler = ManualScheduler::new(ManualClock::new(0));
        let fired = Arc::new(AtomicUsize::new(0));
        let _handle = scheduler.schedule_repeating(Duration::from_millis(100), counter_task(&fired));
        scheduler.stall(450);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.clock().now_ms(), 450);
        scheduler.advance(100);
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_scheduler_stops_after_cancel() {
        let scheduler = TokioScheduler::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let mut handle =
            scheduler.schedule_repeating(Duration::from_millis(50), counter_task(&fired));
        time::sleep(Duration::from_millis(175)).await;
        handle.cancel();
        let seen = fired.load(Ordering::SeqCst);
        assert_eq!(seen, 3);
        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), seen);
    }
}
