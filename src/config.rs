use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::utils;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub database_path: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
    /// Per-source TTL overrides keyed by source tag. Zero disables caching.
    pub cache_ttl_seconds: BTreeMap<String, u64>,
    pub disabled_sources: Vec<String>,
}

impl AppConfig {
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(utils::database_path)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(utils::cache_dir)
    }

    /// TTL for a source: the configured override if any, else the adapter default.
    pub fn ttl_for(&self, tag: &str, default: Option<Duration>) -> Option<Duration> {
        match self.cache_ttl_seconds.get(tag) {
            Some(0) => None,
            Some(secs) => Some(Duration::from_secs(*secs)),
            None => default,
        }
    }

    pub fn is_enabled(&self, tag: &str) -> bool {
        !self.disabled_sources.iter().any(|s| s == tag)
    }

    pub fn set_enabled(&mut self, tag: &str, enabled: bool) {
        self.disabled_sources.retain(|s| s != tag);
        if !enabled {
            self.disabled_sources.push(tag.to_string());
        }
    }
}

pub struct ConfigStore {
    path: PathBuf,
    data: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load() -> Self {
        Self::load_from(utils::config_path())
    }

    pub fn load_from(path: PathBuf) -> Self {
        let data = match read_config(&path) {
            Ok(config) => config,
            Err(err) => {
                tracing::warn!("ignoring unreadable config {}: {err}", path.display());
                AppConfig::default()
            }
        };
        Self {
            path,
            data: Mutex::new(data),
        }
    }

    pub fn read(&self) -> AppConfig {
        match self.data.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update<F>(&self, transform: F) -> Result<AppConfig>
    where
        F: FnOnce(&mut AppConfig),
    {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| PipelineError::Config("config mutex poisoned".to_string()))?;
        transform(&mut guard);
        write_config(&self.path, &guard)?;
        Ok(guard.clone())
    }
}

fn read_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let contents = fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|err| PipelineError::Config(err.to_string()))
}

fn write_config(path: &Path, config: &AppConfig) -> Result<()> {
    utils::ensure_parent(path)?;
    let contents = serde_json::to_string_pretty(config)
        .map_err(|err| PipelineError::Config(err.to_string()))?;
    fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ttl_override_wins_and_zero_disables() {
        let mut config = AppConfig::default();
        config.cache_ttl_seconds.insert("peoply.app".into(), 60);
        config.cache_ttl_seconds.insert("ifinavet.no".into(), 0);
        let default = Some(Duration::from_secs(3600));
        assert_eq!(config.ttl_for("peoply.app", default), Some(Duration::from_secs(60)));
        assert_eq!(config.ttl_for("ifinavet.no", default), None);
        assert_eq!(config.ttl_for("other", default), default);
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.json");
        let store = ConfigStore::load_from(path.clone());
        assert!(store.read().is_enabled("peoply.app"));

        store
            .update(|config| config.set_enabled("peoply.app", false))
            .expect("write config");

        let reloaded = ConfigStore::load_from(path);
        assert!(!reloaded.read().is_enabled("peoply.app"));
        reloaded
            .update(|config| config.set_enabled("peoply.app", true))
            .expect("write config");
        assert!(reloaded.read().disabled_sources.is_empty());
    }

    #[test]
    fn malformed_config_falls_back_to_default() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").expect("write");
        let store = ConfigStore::load_from(path);
        assert_eq!(store.read(), AppConfig::default());
    }
}
