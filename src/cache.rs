//! Per-source cache of the last successful fetch.
//!
//! One entry per source, overwritten on every live fetch and never expired on
//! its own. Whether an entry is still usable is decided by [`is_fresh`] with
//! the TTL in force at read time.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::models::EventDraft;
use crate::utils;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CacheEntry {
    pub source_name: String,
    pub fetched_at: DateTime<Utc>,
    /// TTL that applied when the entry was written. Informational only.
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
    pub payload: Vec<EventDraft>,
}

pub trait CacheStore {
    fn get(&self, source: &str) -> Result<Option<CacheEntry>>;
    fn put(&self, entry: &CacheEntry) -> Result<()>;
    /// Remove the entry for `source`, or every entry when `None`.
    fn remove(&self, source: Option<&str>) -> Result<usize>;
}

/// `0 <= now - fetched_at < ttl`. No TTL means the entry is never fresh, and
/// an entry stamped in the future counts as stale.
pub fn is_fresh(entry: &CacheEntry, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
    let Some(ttl) = ttl else {
        return false;
    };
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    let age = now.signed_duration_since(entry.fetched_at);
    age >= chrono::Duration::zero() && age < ttl
}

const ENTRY_SUFFIX: &str = ".cache.json";

/// JSON document per source under one directory, named `<tag>.cache.json`.
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, source: &str) -> PathBuf {
        self.dir
            .join(format!("{}{ENTRY_SUFFIX}", utils::file_stem(source)))
    }
}

impl CacheStore for FileCache {
    fn get(&self, source: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(source);
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        let entry: CacheEntry =
            serde_json::from_str(&contents).map_err(|err| PipelineError::CacheCorrupt {
                source_tag: source.to_string(),
                reason: err.to_string(),
            })?;
        if entry.source_name != source {
            return Err(PipelineError::CacheCorrupt {
                source_tag: source.to_string(),
                reason: format!("entry belongs to {}", entry.source_name),
            });
        }
        Ok(Some(entry))
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let path = self.entry_path(&entry.source_name);
        let tmp = path.with_extension("json.tmp");
        let contents = serde_json::to_string_pretty(entry).map_err(|err| {
            PipelineError::CacheCorrupt {
                source_tag: entry.source_name.clone(),
                reason: err.to_string(),
            }
        })?;
        fs::write(&tmp, contents)?;
        fs::rename(&tmp, &path)?;
        tracing::debug!("cached {} events for {}", entry.payload.len(), entry.source_name);
        Ok(())
    }

    fn remove(&self, source: Option<&str>) -> Result<usize> {
        if let Some(source) = source {
            let path = self.entry_path(source);
            if !path.exists() {
                return Ok(0);
            }
            fs::remove_file(path)?;
            return Ok(1);
        }

        if !self.dir.exists() {
            return Ok(0);
        }
        let mut removed = 0;
        for item in fs::read_dir(&self.dir)? {
            let path = item?.path();
            let is_entry = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with(ENTRY_SUFFIX));
            if is_entry {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Process-local cache for tests and cache-less runs.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, source: &str) -> Result<Option<CacheEntry>> {
        Ok(self.lock().get(source).cloned())
    }

    fn put(&self, entry: &CacheEntry) -> Result<()> {
        self.lock()
            .insert(entry.source_name.clone(), entry.clone());
        Ok(())
    }

    fn remove(&self, source: Option<&str>) -> Result<usize> {
        let mut entries = self.lock();
        match source {
            Some(source) => Ok(entries.remove(source).map_or(0, |_| 1)),
            None => {
                let removed = entries.len();
                entries.clear();
                Ok(removed)
            }
        }
    }
}
