use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network or parse failure inside one source adapter.
    #[error("fetch failed for {source_tag}: {cause:#}")]
    AdapterFetch {
        source_tag: String,
        cause: anyhow::Error,
    },
    /// Cached payload could not be decoded; callers fall back to a live fetch.
    #[error("cache entry for {source_tag} is corrupt: {reason}")]
    CacheCorrupt { source_tag: String, reason: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persistence error: {0}")]
    PersistenceWrite(#[from] rusqlite::Error),
    #[error("no persisted event with id {0}")]
    MissingEvent(i64),
    #[error("unknown source: {0}")]
    UnknownSource(String),
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn adapter(source_tag: &str, cause: anyhow::Error) -> Self {
        PipelineError::AdapterFetch {
            source_tag: source_tag.to_string(),
            cause,
        }
    }

    /// Errors after which the current invocation must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::PersistenceWrite(_) | PipelineError::MissingEvent(_)
        )
    }
}
