//! Durable identity cache backed by a JSON file.
//!
//! Layout: `{ "<node name>": { "value": "<multiaddress>", "expiresAtMs": <unix ms> } }`.
//! The whole map is rewritten on every `set`; expired entries are pruned then.

use async_trait::async_trait;
use peering_core::{CacheError, IdentityCache};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    value: String,
    expires_at_ms: u64,
}

impl StoredEntry {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms > now_ms && !self.value.is_empty()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct JsonFileCache {
    path: PathBuf,
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl JsonFileCache {
    /// Open the cache file, starting empty if it doesn't exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        let entries = Self::load(&path).await?;
        info!("Identity cache {:?} holds {} entries", path, entries.len());
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    async fn load(path: &Path) -> Result<HashMap<String, StoredEntry>, CacheError> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) if contents.trim().is_empty() => Ok(HashMap::new()),
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| CacheError::Io(format!("{:?}: {}", path, e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(CacheError::Unavailable(format!("{:?}: {}", path, e))),
        }
    }

    async fn save(&self, entries: &HashMap<String, StoredEntry>) -> Result<(), CacheError> {
        let io = |e: std::io::Error| CacheError::Io(format!("{:?}: {}", self.path, e));
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io)?;
        }

        let contents = serde_json::to_string_pretty(entries)
            .map_err(|e| CacheError::Io(e.to_string()))?;
        // Write then rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await.map_err(io)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io)?;
        Ok(())
    }
}

#[async_trait]
impl IdentityCache for JsonFileCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|e| e.is_live(now_ms()))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        let now = now_ms();
        entries.retain(|_, e| e.expires_at_ms > now);
        entries.insert(
            key.to_string(),
            StoredEntry {
                value: value.to_string(),
                expires_at_ms: now.saturating_add(ttl.as_millis() as u64),
            },
        );
        self.save(&entries).await?;
        debug!("Cached {} ({} entries)", key, entries.len());
        Ok(())
    }

    async fn list_all(&self) -> Result<HashMap<String, String>, CacheError> {
        let now = now_ms();
        let entries = self.entries.lock().await;
        Ok(entries
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }
}
