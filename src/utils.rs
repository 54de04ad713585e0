use dirs::data_dir;
use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const HOME_ENV: &str = "IFI_EVENTS_HOME";

static DATA_ROOT: Lazy<PathBuf> = Lazy::new(|| {
    let root = match std::env::var_os(HOME_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => data_dir()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
            .join("ifi-events"),
    };
    if let Err(err) = fs::create_dir_all(&root) {
        tracing::warn!("failed to create data root {}: {err}", root.display());
    }
    root
});

pub fn data_root() -> PathBuf {
    DATA_ROOT.clone()
}

pub fn database_path() -> PathBuf {
    data_root().join("events.sqlite")
}

pub fn cache_dir() -> PathBuf {
    data_root().join("cache")
}

pub fn config_path() -> PathBuf {
    data_root().join("config.json")
}

pub fn ensure_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// File-system friendly form of a source tag, e.g. `peoply.app` -> `peoply_app`.
pub fn file_stem(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_replaces_separators() {
        assert_eq!(file_stem("peoply.app"), "peoply_app");
        assert_eq!(file_stem("../etc"), "___etc");
    }
}
