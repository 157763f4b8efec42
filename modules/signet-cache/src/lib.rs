//! Key-value cache boundary and the namespace invalidator.
//!
//! The cache holds derived read models (per-viewer application listings).
//! Writers never update entries in place; they drop a whole namespace and let
//! the next read recompute it.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

/// Namespace for cached per-viewer application listings.
pub const APP_LISTING_PREFIX: &str = "core/app_listings/";

/// Cache key for one viewer's application listing.
pub fn app_listing_key(viewer: &str) -> String {
    format!("{APP_LISTING_PREFIX}{viewer}")
}

/// External key-value cache. `keys` supports a trailing-`*` wildcard; any
/// other pattern is an exact-key match.
#[async_trait]
pub trait KeyValueCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;
    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()>;
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;
    async fn delete_many(&self, keys: &[String]) -> Result<()>;
}

/// Drop every cache entry under `prefix`. Used by lifecycle rules to
/// invalidate a derived namespace wholesale.
pub async fn invalidate_prefix(cache: &dyn KeyValueCache, prefix: &str) -> Result<()> {
    let keys = cache.keys(&format!("{prefix}*")).await?;
    if keys.is_empty() {
        return Ok(());
    }
    let dropped = keys.len();
    cache.delete_many(&keys).await?;
    debug!(prefix, dropped, "Invalidated cache namespace");
    Ok(())
}

// ---------------------------------------------------------------------------
// MemoryCache (shared in-process implementation)
// ---------------------------------------------------------------------------

/// In-process cache shared across readers and writers. Thread-safe, no
/// locking visible to callers; invalidation is eventually consistent with
/// respect to readers holding already-fetched values.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KeyValueCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        let matched = match pattern.strip_suffix('*') {
            Some(prefix) => entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => entries
                .keys()
                .filter(|k| k.as_str() == pattern)
                .cloned()
                .collect(),
        };
        Ok(matched)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}
