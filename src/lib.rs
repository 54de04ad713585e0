pub mod cache;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod fetch;
pub mod models;
pub mod pipeline;
pub mod scraping;
pub mod utils;

pub use cache::{CacheEntry, CacheStore, FileCache, MemoryCache};
pub use config::{AppConfig, ConfigStore};
pub use db::{Scope, Store};
pub use error::{PipelineError, Result};
pub use fetch::{FetchOrigin, FetchedBatch, Fetcher, SourceOutcome};
pub use models::{Event, EventDraft, NormalizedEvent};
pub use pipeline::{DedupReport, FetchReport, Pipeline, ShowTarget, SourceCounts, SourceReport};
pub use scraping::{SourceAdapter, SourceInfo, SourceSelector};
