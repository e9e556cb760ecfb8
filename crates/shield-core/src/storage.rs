use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, ShieldError};
use crate::settings::ProtectionConfig;

pub const CONFIG_KEY: &str = "darklock.protection.config";

/// Called with the new raw value whenever a watched key is written.
pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// Cross-surface key/value store the protection config is persisted in.
pub trait ConfigStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<String>>;
    fn write(&self, key: &str, value: &str) -> Result<()>;
    /// Observe writes to `key` made through any handle on the same backing
    /// store, this one included.
    fn watch(&self, key: &str, listener: ChangeListener) -> Result<StoreWatch>;
}

/// Registration returned by [`ConfigStore::watch`]. The watch ends when the
/// registration is cancelled or dropped.
pub struct StoreWatch {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl StoreWatch {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for StoreWatch {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for StoreWatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreWatch")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

struct KeyListener {
    id: u64,
    key: String,
    callback: ChangeListener,
}

/// In-process store. Every handle sharing the same `MemoryStore` sees the
/// others' writes synchronously.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    listeners: Arc<Mutex<Vec<KeyListener>>>,
    next_id: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        // listeners run without the lock so they may read or write back
        let callbacks: Vec<ChangeListener> = self
            .listeners
            .lock()
            .iter()
            .filter(|l| l.key == key)
            .map(|l| l.callback.clone())
            .collect();
        for callback in callbacks {
            callback(value);
        }
        Ok(())
    }

    fn watch(&self, key: &str, listener: ChangeListener) -> Result<StoreWatch> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push(KeyListener {
            id,
            key: key.to_string(),
            callback: listener,
        });
        let listeners = Arc::downgrade(&self.listeners);
        Ok(StoreWatch::new(move || {
            if let Some(listeners) = listeners.upgrade() {
                listeners.lock().retain(|l| l.id != id);
            }
        }))
    }
}

/// One JSON file per key under a directory. Writes go through a temp file
/// in the same directory and are renamed into place, so watchers in other
/// processes only ever read complete records.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file}.json"))
    }
}

impl ConfigStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(value.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&path)
            .map_err(|e| ShieldError::Storage(format!("persist {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Watches the directory rather than the file: the atomic rename in
    /// [`FileStore::write`] replaces the file on every write.
    fn watch(&self, key: &str, listener: ChangeListener) -> Result<StoreWatch> {
        let path = self.path_for(key);
        let file_name = path.file_name().map(|name| name.to_os_string());
        let watch_error =
            |e: notify::Error| ShieldError::Storage(format!("watch {}: {}", self.dir.display(), e));

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_) | EventKind::Remove(_)) {
                        return;
                    }
                    if !event.paths.iter().any(|p| p.file_name() == file_name.as_deref()) {
                        return;
                    }
                    match fs::read_to_string(&path) {
                        Ok(data) => listener(&data),
                        Err(err) => debug!(error = %err, "changed record not readable"),
                    }
                }
                Err(err) => warn!(error = %err, "config store watcher error"),
            },
            Config::default(),
        )
        .map_err(watch_error)?;
        watcher
            .watch(&self.dir, RecursiveMode::NonRecursive)
            .map_err(watch_error)?;
        Ok(StoreWatch::new(move || drop(watcher)))
    }
}

/// Read the persisted config. Absent, unreadable or corrupt records all
/// yield defaults; partial records are merged with them.
pub fn load_config(store: &dyn ConfigStore) -> ProtectionConfig {
    match store.read(CONFIG_KEY) {
        Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            warn!(error = %err, "stored protection config is corrupt, using defaults");
            ProtectionConfig::default()
        }),
        Ok(None) => ProtectionConfig::default(),
        Err(err) => {
            warn!(error = %err, "protection config unreadable, using defaults");
            ProtectionConfig::default()
        }
    }
}

pub fn save_config(store: &dyn ConfigStore, config: &ProtectionConfig) -> Result<()> {
    let data = serde_json::to_string(config)?;
    store.write(CONFIG_KEY, &data)
}
