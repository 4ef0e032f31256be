/// Persisted map id → gamemode classification cache.
///
/// On disk this is a JSON object:
///   { "<map id>": ["<gamemode code>", "<gamemode display>", <resolved at, epoch seconds>] }
///
/// Stores only hold entries; freshness against a TTL is decided by the caller
/// through [`MapCacheStore::get_fresh`].
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("custom map cache io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("custom map cache is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub gamemode_code: String,
    pub gamemode_display: String,
    pub resolved_at: i64,
}

impl CacheEntry {
    /// An entry is fresh while its age is strictly below the TTL; an entry
    /// exactly `ttl_secs` old is already expired.
    pub fn is_fresh(&self, now: i64, ttl_secs: i64) -> bool {
        now - self.resolved_at < ttl_secs
    }
}

type RawEntry = (String, String, i64);

impl From<RawEntry> for CacheEntry {
    fn from((gamemode_code, gamemode_display, resolved_at): RawEntry) -> Self {
        Self {
            gamemode_code,
            gamemode_display,
            resolved_at,
        }
    }
}

impl CacheEntry {
    fn to_raw(&self) -> RawEntry {
        (self.gamemode_code.clone(), self.gamemode_display.clone(), self.resolved_at)
    }
}

/// Keyed store behind the custom map resolver.
pub trait MapCacheStore: Send {
    fn get(&self, map_id: &str) -> Option<CacheEntry>;

    /// Writes one entry. Implementations must keep every other entry intact.
    fn put(&mut self, map_id: &str, entry: CacheEntry) -> Result<(), CacheError>;

    fn contains_fresh(&self, map_id: &str, now: i64, ttl_secs: i64) -> bool {
        self.get(map_id).is_some_and(|e| e.is_fresh(now, ttl_secs))
    }

    /// Returns the entry only if it is younger than `ttl_secs`.
    fn get_fresh(&self, map_id: &str, now: i64, ttl_secs: i64) -> Option<CacheEntry> {
        if self.contains_fresh(map_id, now, ttl_secs) {
            self.get(map_id)
        } else {
            None
        }
    }
}

/// Process-local store, used in tests and when no data directory is available.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: HashMap<String, CacheEntry>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MapCacheStore for MemoryCacheStore {
    fn get(&self, map_id: &str) -> Option<CacheEntry> {
        self.entries.get(map_id).cloned()
    }

    fn put(&mut self, map_id: &str, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.insert(map_id.to_string(), entry);
        Ok(())
    }
}

/// JSON file store.
///
/// Entries are loaded once when the store is opened. Every `put` re-reads the
/// file, inserts the new entry and replaces the file through a temp file +
/// rename, so entries written by anyone else in the meantime survive.
pub struct JsonFileCacheStore {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl JsonFileCacheStore {
    /// Opens the store at `path`. A missing file is an empty cache; an
    /// unreadable or corrupt one is logged and also treated as empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match read_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(target: "custom_maps", "Ignoring custom map cache {}: {e}", path.display());
                HashMap::new()
            }
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl MapCacheStore for JsonFileCacheStore {
    fn get(&self, map_id: &str) -> Option<CacheEntry> {
        self.entries.get(map_id).cloned()
    }

    fn put(&mut self, map_id: &str, entry: CacheEntry) -> Result<(), CacheError> {
        let mut on_disk = read_entries(&self.path).unwrap_or_else(|e| {
            tracing::warn!(target: "custom_maps", "Rewriting unreadable custom map cache: {e}");
            self.entries.clone()
        });
        on_disk.insert(map_id.to_string(), entry);
        write_entries(&self.path, &on_disk)?;
        self.entries = on_disk;
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<HashMap<String, CacheEntry>, CacheError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(HashMap::new());
    }
    let raw: HashMap<String, RawEntry> = serde_json::from_str(&content)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into())).collect())
}

fn write_entries(path: &Path, entries: &HashMap<String, CacheEntry>) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let raw: HashMap<&str, RawEntry> = entries
        .iter()
        .map(|(k, v)| (k.as_str(), v.to_raw()))
        .collect();
    let content = serde_json::to_string_pretty(&raw)?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
