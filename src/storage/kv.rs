use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

/// String key-value store that survives a single client session (the browser's local storage
/// in the dashboard; a JSON file or plain memory here).
pub trait LocalStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

pub type SharedLocalStore = Arc<dyn LocalStore>;

#[derive(Default)]
pub struct MemoryStore {
    map: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
    pub fn shared() -> SharedLocalStore { Arc::new(Self::new()) }
    pub fn len(&self) -> usize { self.map.read().len() }
    pub fn is_empty(&self) -> bool { self.map.read().is_empty() }
}

impl LocalStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> { self.map.read().get(key).cloned() }
    fn set(&self, key: &str, value: &str) { self.map.write().insert(key.to_string(), value.to_string()); }
    fn remove(&self, key: &str) { self.map.write().remove(key); }
}

/// JSON-object file, loaded once and written through on every mutation.
/// I/O problems are logged and the in-memory view stays authoritative.
pub struct FileStore {
    path: PathBuf,
    map: RwLock<BTreeMap<String, String>>,
}

impl FileStore {
    pub fn open(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let map = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<BTreeMap<String, String>>(&bytes).unwrap_or_else(|e| {
                warn!(target: "starclient::store", path = %path.display(), "ignoring unreadable state file: {}", e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, map: RwLock::new(map) }
    }

    pub fn path(&self) -> &Path { &self.path }

    fn save(&self, map: &BTreeMap<String, String>) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, &self.path)?;
        Ok(())
    }

    fn mutate(&self, f: impl FnOnce(&mut BTreeMap<String, String>)) {
        let mut map = self.map.write();
        f(&mut map);
        if let Err(e) = self.save(&map) {
            warn!(target: "starclient::store", path = %self.path.display(), "failed to persist state: {}", e);
        }
    }
}

impl LocalStore for FileStore {
    fn get(&self, key: &str) -> Option<String> { self.map.read().get(key).cloned() }
    fn set(&self, key: &str, value: &str) { self.mutate(|m| { m.insert(key.to_string(), value.to_string()); }); }
    fn remove(&self, key: &str) { self.mutate(|m| { m.remove(key); }); }
}
