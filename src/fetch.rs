//! Cache-or-live decision per source.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{self, CacheEntry, CacheStore};
use crate::config::AppConfig;
use crate::error::{PipelineError, Result};
use crate::models::{EventDraft, NormalizedEvent};
use crate::scraping::{self, SourceAdapter, SourceSelector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchOrigin {
    Cache,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBatch {
    pub origin: FetchOrigin,
    pub fetched_at: DateTime<Utc>,
    pub events: Vec<NormalizedEvent>,
}

#[derive(Debug)]
pub struct SourceOutcome {
    pub source_tag: String,
    pub result: Result<FetchedBatch>,
}

/// Resolve a selector against the registry. `All` skips disabled sources;
/// naming a source explicitly fetches it regardless.
pub fn select<'a>(
    sources: &'a [Box<dyn SourceAdapter>],
    target: &SourceSelector,
    config: &AppConfig,
) -> Result<Vec<&'a dyn SourceAdapter>> {
    match target {
        SourceSelector::All => Ok(sources
            .iter()
            .map(|source| source.as_ref())
            .filter(|source| config.is_enabled(source.source_tag()))
            .collect()),
        SourceSelector::One(name) => sources
            .iter()
            .map(|source| source.as_ref())
            .find(|source| scraping::matches(*source, name))
            .map(|source| vec![source])
            .ok_or_else(|| PipelineError::UnknownSource(name.clone())),
    }
}

pub struct Fetcher<'a> {
    cache: &'a dyn CacheStore,
    sources: &'a [Box<dyn SourceAdapter>],
    config: &'a AppConfig,
}

impl<'a> Fetcher<'a> {
    pub fn new(
        cache: &'a dyn CacheStore,
        sources: &'a [Box<dyn SourceAdapter>],
        config: &'a AppConfig,
    ) -> Self {
        Self {
            cache,
            sources,
            config,
        }
    }

    pub fn fetch(&self, target: &SourceSelector, live: bool) -> Result<Vec<SourceOutcome>> {
        self.fetch_at(target, live, Utc::now())
    }

    /// One outcome per targeted source, in registry order. Only an unknown
    /// source name fails the whole call.
    pub fn fetch_at(
        &self,
        target: &SourceSelector,
        live: bool,
        now: DateTime<Utc>,
    ) -> Result<Vec<SourceOutcome>> {
        let selected = select(self.sources, target, self.config)?;
        Ok(selected
            .into_iter()
            .map(|source| SourceOutcome {
                source_tag: source.source_tag().to_string(),
                result: self.fetch_source(source, live, now),
            })
            .collect())
    }

    fn fetch_source(
        &self,
        source: &dyn SourceAdapter,
        live: bool,
        now: DateTime<Utc>,
    ) -> Result<FetchedBatch> {
        let tag = source.source_tag();
        let ttl = self.config.ttl_for(tag, source.cache_ttl());

        if !live {
            if let Some(entry) = self.cached(tag) {
                if cache::is_fresh(&entry, ttl, now) {
                    tracing::debug!(
                        "using cached {} events for {tag} from {}",
                        entry.payload.len(),
                        entry.fetched_at
                    );
                    let fetched_at = entry.fetched_at;
                    return Ok(FetchedBatch {
                        origin: FetchOrigin::Cache,
                        fetched_at,
                        events: stamp_all(entry.payload, fetched_at),
                    });
                }
                tracing::debug!("cache for {tag} is stale");
            }
        }

        tracing::info!("fetching {tag} from {}", source.base_url());
        let drafts = source
            .fetch_events()
            .map_err(|err| PipelineError::adapter(tag, err))?;
        tracing::info!("fetched {} events from {tag}", drafts.len());

        let entry = CacheEntry {
            source_name: tag.to_string(),
            fetched_at: now,
            ttl_seconds: ttl.map(|ttl| ttl.as_secs()),
            payload: drafts,
        };
        if let Err(err) = self.cache.put(&entry) {
            tracing::warn!("failed to cache {tag}: {err}");
        }

        Ok(FetchedBatch {
            origin: FetchOrigin::Live,
            fetched_at: now,
            events: stamp_all(entry.payload, now),
        })
    }

    fn cached(&self, tag: &str) -> Option<CacheEntry> {
        match self.cache.get(tag) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!("ignoring cache for {tag}: {err}");
                None
            }
        }
    }
}

fn stamp_all(drafts: Vec<EventDraft>, fetched_at: DateTime<Utc>) -> Vec<NormalizedEvent> {
    drafts
        .into_iter()
        .map(|draft| draft.stamp(fetched_at))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingSource {
        tag: &'static str,
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl SourceAdapter for CountingSource {
        fn source_tag(&self) -> &'static str {
            self.tag
        }

        fn alias(&self) -> &'static str {
            "counting"
        }

        fn base_url(&self) -> &'static str {
            "https://example.invalid"
        }

        fn cache_ttl(&self) -> Option<Duration> {
            Some(Duration::from_secs(600))
        }

        fn fetch_events(&self) -> anyhow::Result<Vec<EventDraft>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("connection refused");
            }
            let start = Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap();
            Ok(vec![EventDraft::new(self.tag, "Quiz Night", start)])
        }
    }

    fn source(tag: &'static str, fail: bool) -> (Box<dyn SourceAdapter>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let adapter = CountingSource {
            tag,
            calls: Arc::clone(&calls),
            fail,
        };
        (Box::new(adapter), calls)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, 20, 10, 0, 0).unwrap()
    }

    #[test]
    fn fresh_cache_skips_the_adapter() {
        let (adapter, calls) = source("a.test", false);
        let sources = vec![adapter];
        let cache = MemoryCache::new();
        let config = AppConfig::default();
        let fetcher = Fetcher::new(&cache, &sources, &config);
        let target = SourceSelector::All;

        let first = fetcher.fetch_at(&target, false, t0()).expect("fetch");
        let batch = first[0].result.as_ref().expect("live batch");
        assert_eq!(batch.origin, FetchOrigin::Live);
        assert_eq!(batch.events[0].fetched_at, t0());

        let later = t0() + chrono::Duration::seconds(300);
        let second = fetcher.fetch_at(&target, false, later).expect("fetch");
        let batch = second[0].result.as_ref().expect("cached batch");
        assert_eq!(batch.origin, FetchOrigin::Cache);
        assert_eq!(batch.events[0].fetched_at, t0());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stale = t0() + chrono::Duration::seconds(600);
        fetcher.fetch_at(&target, false, stale).expect("fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        fetcher.fetch_at(&target, true, stale).expect("fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn zero_ttl_override_always_goes_live() {
        let (adapter, calls) = source("a.test", false);
        let sources = vec![adapter];
        let cache = MemoryCache::new();
        let mut config = AppConfig::default();
        config.cache_ttl_seconds.insert("a.test".into(), 0);
        let fetcher = Fetcher::new(&cache, &sources, &config);

        fetcher.fetch_at(&SourceSelector::All, false, t0()).expect("fetch");
        fetcher.fetch_at(&SourceSelector::All, false, t0()).expect("fetch");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failing_source_does_not_affect_siblings() {
        let (broken, _) = source("broken.test", true);
        let (healthy, _) = source("healthy.test", false);
        let sources = vec![broken, healthy];
        let cache = MemoryCache::new();
        let config = AppConfig::default();
        let fetcher = Fetcher::new(&cache, &sources, &config);

        let outcomes = fetcher.fetch_at(&SourceSelector::All, false, t0()).expect("fetch");
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[0].source_tag, "broken.test");
        assert!(matches!(
            outcomes[0].result,
            Err(PipelineError::AdapterFetch { .. })
        ));
        assert!(outcomes[1].result.is_ok());
        assert!(cache.get("broken.test").expect("get").is_none());
        assert!(cache.get("healthy.test").expect("get").is_some());
    }

    #[test]
    fn selection_rules() {
        let (a, _) = source("a.test", false);
        let (b, _) = source("b.test", false);
        let sources = vec![a, b];
        let mut config = AppConfig::default();
        config.set_enabled("b.test", false);

        let all = select(&sources, &SourceSelector::All, &config).expect("all");
        assert_eq!(all.len(), 1);
        let named = select(&sources, &SourceSelector::One("b.test".into()), &config)
            .expect("explicit");
        assert_eq!(named[0].source_tag(), "b.test");
        let err = select(&sources, &SourceSelector::One("nope".into()), &config)
            .err()
            .expect("unknown");
        assert!(matches!(err, PipelineError::UnknownSource(name) if name == "nope"));
    }
}
