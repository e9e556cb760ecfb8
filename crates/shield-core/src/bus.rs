//! Settings propagation bus.
//!
//! Each viewer surface mounts its own [`SettingsBus`] over the shared
//! [`ConfigStore`], or holds a clone of another surface's bus. A publish
//! persists the config and the store's change hook carries it to every bus
//! mounted over the same store, in this process or another. Subscribers
//! receive the parsed value and never read the store themselves. One writer
//! at a time is assumed; the last write wins. Publishers that are also
//! subscribers receive their own write.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::settings::ProtectionConfig;
use crate::storage::{load_config, save_config, ConfigStore, StoreWatch, CONFIG_KEY};

pub type SettingsHandler = Arc<dyn Fn(&ProtectionConfig) + Send + Sync>;

struct BusInner {
    store: Arc<dyn ConfigStore>,
    subscribers: Mutex<Vec<(u64, SettingsHandler)>>,
    next_id: AtomicU64,
    current: watch::Sender<ProtectionConfig>,
    store_watch: Mutex<Option<StoreWatch>>,
}

impl BusInner {
    fn on_store_change(&self, raw: &str) {
        let config: ProtectionConfig = match serde_json::from_str(raw) {
            Ok(config) => config,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable protection config update");
                return;
            }
        };
        if let Err(err) = config.validate() {
            warn!(error = %err, "ignoring out-of-range protection config update");
            return;
        }
        self.accept(config, false);
    }

    /// Cache `config` and notify subscribers. An update equal to the cached
    /// value is only delivered when `force` is set.
    fn accept(&self, config: ProtectionConfig, force: bool) {
        let changed = self.current.send_if_modified(|current| {
            if *current == config {
                false
            } else {
                *current = config.clone();
                true
            }
        });
        if !changed && !force {
            return;
        }
        // handlers run outside the lock so they may subscribe or publish
        let handlers: Vec<SettingsHandler> = self
            .subscribers
            .lock()
            .iter()
            .map(|(_, handler)| handler.clone())
            .collect();
        debug!(subscribers = handlers.len(), "protection config delivered");
        for handler in handlers {
            handler(&config);
        }
    }
}

#[derive(Clone)]
pub struct SettingsBus {
    inner: Arc<BusInner>,
}

impl SettingsBus {
    /// Mount the bus over `store`, reading the persisted config once and
    /// watching the store for writes made through other handles.
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        let initial = load_config(store.as_ref());
        let (current, _rx) = watch::channel(initial);
        let inner = Arc::new(BusInner {
            store,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            current,
            store_watch: Mutex::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let listener = Arc::new(move |raw: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.on_store_change(raw);
            }
        });
        match inner.store.watch(CONFIG_KEY, listener) {
            Ok(watch) => *inner.store_watch.lock() = Some(watch),
            Err(err) => warn!(error = %err, "config store cannot report changes; only local publishes will be seen"),
        }
        Self { inner }
    }

    /// Persist the cached config if the store has none yet, as the first
    /// viewer to mount does.
    pub fn bootstrap(&self) -> Result<ProtectionConfig> {
        let current = self.current();
        if self.inner.store.read(CONFIG_KEY)?.is_none() {
            save_config(self.inner.store.as_ref(), &current)?;
            info!("protection config initialised with defaults");
        }
        Ok(current)
    }

    /// Last published (or mounted) config. Never touches the store.
    pub fn current(&self) -> ProtectionConfig {
        self.inner.current.borrow().clone()
    }

    /// Validate, persist and deliver `config`. Subscribers of this bus are
    /// called before this returns even when the value is unchanged.
    pub fn publish(&self, config: ProtectionConfig) -> Result<()> {
        config.validate()?;
        let unchanged = *self.inner.current.borrow() == config;
        save_config(self.inner.store.as_ref(), &config)?;
        self.inner.accept(config, unchanged);
        Ok(())
    }

    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&ProtectionConfig) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribers.lock().push((id, Arc::new(handler)));
        Subscription {
            id,
            bus: Arc::downgrade(&self.inner),
            active: AtomicBool::new(true),
        }
    }

    /// Async view of the config for surfaces running on a runtime.
    pub fn watch(&self) -> watch::Receiver<ProtectionConfig> {
        self.inner.current.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

/// Handle returned by [`SettingsBus::subscribe`]. Dropping it keeps the
/// subscription alive; call [`Subscription::unsubscribe`] to end it.
pub struct Subscription {
    id: u64,
    bus: Weak<BusInner>,
    active: AtomicBool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("active", &self.active.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShieldError;
    use crate::storage::{ChangeListener, FileStore, MemoryStore};
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    /// Store that counts reads so tests can prove subscribers never poll it.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl ConfigStore for CountingStore {
        fn read(&self, key: &str) -> Result<Option<String>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(key)
        }

        fn write(&self, key: &str, value: &str) -> Result<()> {
            self.inner.write(key, value)
        }

        fn watch(&self, key: &str, listener: ChangeListener) -> Result<StoreWatch> {
            self.inner.watch(key, listener)
        }
    }

    #[test]
    fn config_drift_converges_without_store_reads() {
        let store = Arc::new(CountingStore::default());
        let surface_a = SettingsBus::new(store.clone());
        let surface_b = SettingsBus::new(store.clone());

        let mut initial = ProtectionConfig::default();
        initial.screenshot_blocking = false;
        surface_a.publish(initial).unwrap();

        let observed = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        let _sub = surface_b.subscribe(move |cfg| *slot.lock() = Some(cfg.screenshot_blocking));

        let reads_before = store.reads.load(Ordering::SeqCst);
        let mut update = surface_a.current();
        update.screenshot_blocking = true;
        surface_a.publish(update).unwrap();

        assert_eq!(*observed.lock(), Some(true));
        assert!(surface_b.current().screenshot_blocking);
        assert_eq!(store.reads.load(Ordering::SeqCst), reads_before);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let bus = SettingsBus::new(Arc::new(MemoryStore::new()));
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let sub = bus.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        bus.publish(ProtectionConfig::default()).unwrap();
        sub.unsubscribe();
        sub.unsubscribe();
        bus.publish(ProtectionConfig::default()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn invalid_config_is_not_published() {
        let store = Arc::new(MemoryStore::new());
        let bus = SettingsBus::new(store.clone());
        let mut bad = ProtectionConfig::default();
        bad.heartbeat_interval_ms = 0;
        assert!(matches!(bus.publish(bad), Err(ShieldError::InvalidConfig(_))));
        assert!(store.read(CONFIG_KEY).unwrap().is_none());
        assert_eq!(bus.current(), ProtectionConfig::default());
    }

    #[test]
    fn bootstrap_persists_defaults_once() {
        let store = Arc::new(MemoryStore::new());
        let bus = SettingsBus::new(store.clone());
        assert_eq!(bus.bootstrap().unwrap(), ProtectionConfig::default());
        assert!(store.read(CONFIG_KEY).unwrap().is_some());

        let mut custom = ProtectionConfig::default();
        custom.right_click_block = false;
        bus.publish(custom.clone()).unwrap();
        let remounted = SettingsBus::new(store.clone());
        assert_eq!(remounted.bootstrap().unwrap(), custom);
    }

    #[test]
    fn handlers_may_publish_reentrantly() {
        let bus = SettingsBus::new(Arc::new(MemoryStore::new()));
        let echo = bus.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = bus.subscribe(move |cfg| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                // own write comes back; re-applying it is harmless
                echo.publish(cfg.clone()).unwrap();
            }
        });
        bus.publish(ProtectionConfig::default()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn watch_receivers_see_the_latest_value() {
        let bus = SettingsBus::new(Arc::new(MemoryStore::new()));
        let mut rx = bus.watch();
        let mut update = ProtectionConfig::default();
        update.forensic_watermark = false;
        bus.publish(update).unwrap();
        rx.changed().await.unwrap();
        assert!(!rx.borrow().forensic_watermark);
    }

    #[test]
    fn shared_handles_see_one_publish_once() {
        let bus = SettingsBus::new(Arc::new(MemoryStore::new()));
        let other = bus.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = other.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut update = ProtectionConfig::default();
        update.pip_block = false;
        bus.publish(update).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!other.current().pip_block);
    }

    #[test]
    fn dropped_bus_stops_listening_to_the_store() {
        let store = Arc::new(MemoryStore::new());
        let publisher = SettingsBus::new(store.clone());
        let mounted = SettingsBus::new(store.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let _sub = mounted.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(mounted);
        let mut update = ProtectionConfig::default();
        update.right_click_block = false;
        publisher.publish(update).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn foreign_writes_are_validated_before_delivery() {
        let store = Arc::new(MemoryStore::new());
        let bus = SettingsBus::new(store.clone());
        store.write(CONFIG_KEY, r#"{"heartbeatIntervalMs": 1}"#).unwrap();
        store.write(CONFIG_KEY, "not json").unwrap();
        assert_eq!(bus.current(), ProtectionConfig::default());
        store.write(CONFIG_KEY, r#"{"focusProtection": false}"#).unwrap();
        assert!(!bus.current().focus_protection);
    }

    #[test]
    fn file_backed_buses_converge_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let viewer = SettingsBus::new(Arc::new(FileStore::new(dir.path()).unwrap()));
        let settings = SettingsBus::new(Arc::new(FileStore::new(dir.path()).unwrap()));
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let _sub = viewer.subscribe(move |cfg| {
            let _ = tx.lock().send(cfg.screenshot_blocking);
        });

        let mut update = settings.current();
        update.screenshot_blocking = false;
        settings.publish(update).unwrap();

        assert!(!rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!viewer.current().screenshot_blocking);
    }
}
