//! Explicit context behind every trigger: cache, store, adapters and config.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::{CacheStore, FileCache};
use crate::config::AppConfig;
use crate::db::{Scope, Store};
use crate::dedup::{self, IdentityAmbiguous};
use crate::error::{PipelineError, Result};
use crate::fetch::{self, FetchOrigin, Fetcher, SourceOutcome};
use crate::models::{Event, NormalizedEvent};
use crate::scraping::{self, SourceAdapter, SourceInfo, SourceSelector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCounts {
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug)]
pub struct SourceReport {
    pub source_tag: String,
    pub result: Result<(FetchOrigin, SourceCounts)>,
}

#[derive(Debug, Default)]
pub struct FetchReport {
    pub sources: Vec<SourceReport>,
}

impl FetchReport {
    pub fn failures(&self) -> usize {
        self.sources.iter().filter(|s| s.result.is_err()).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupReport {
    pub removed: usize,
    pub remaining: usize,
    pub ambiguous: Vec<IdentityAmbiguous>,
}

/// What `show` looks up: `r` for random, `n` for next, or an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowTarget {
    Id(i64),
    Random,
    Next,
}

impl FromStr for ShowTarget {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "r" | "random" => Ok(ShowTarget::Random),
            "n" | "next" => Ok(ShowTarget::Next),
            other => other
                .parse()
                .map(ShowTarget::Id)
                .map_err(|_| format!("expected an event id, 'r' or 'n', got '{value}'")),
        }
    }
}

pub struct Pipeline {
    cache: Box<dyn CacheStore>,
    store: Store,
    sources: Vec<Box<dyn SourceAdapter>>,
    config: AppConfig,
}

impl Pipeline {
    pub fn new(
        cache: Box<dyn CacheStore>,
        store: Store,
        sources: Vec<Box<dyn SourceAdapter>>,
        config: AppConfig,
    ) -> Self {
        Self {
            cache,
            store,
            sources,
            config,
        }
    }

    /// File cache and SQLite store at the locations `config` points to,
    /// with every registered adapter.
    pub fn open(config: AppConfig) -> Result<Self> {
        let store = Store::open(&config.database_path())?;
        let cache = FileCache::new(config.cache_dir());
        Ok(Self::new(
            Box::new(cache),
            store,
            scraping::active_sources(),
            config,
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Fetch, reconcile and persist each targeted source.
    ///
    /// Adapter failures are reported per source. A persistence failure stops
    /// the run; sources already applied stay committed.
    pub fn fetch(&mut self, target: &SourceSelector, live: bool) -> Result<FetchReport> {
        self.fetch_at(target, live, Utc::now())
    }

    pub fn fetch_at(
        &mut self,
        target: &SourceSelector,
        live: bool,
        now: DateTime<Utc>,
    ) -> Result<FetchReport> {
        let outcomes = Fetcher::new(self.cache.as_ref(), &self.sources, &self.config)
            .fetch_at(target, live, now)?;

        let mut report = FetchReport::default();
        for outcome in outcomes {
            let result = outcome.result.and_then(|batch| {
                let counts = self.persist(&outcome.source_tag, batch.events, now)?;
                Ok((batch.origin, counts))
            });
            let result = match result {
                Err(err) if err.is_fatal() => {
                    tracing::error!("stopping fetch at {}: {err}", outcome.source_tag);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!("{err}");
                    Err(err)
                }
                ok => ok,
            };
            report.sources.push(SourceReport {
                source_tag: outcome.source_tag,
                result,
            });
        }
        Ok(report)
    }

    /// Fetch without touching the event store.
    pub fn fetch_only(&self, target: &SourceSelector, live: bool) -> Result<Vec<SourceOutcome>> {
        Fetcher::new(self.cache.as_ref(), &self.sources, &self.config).fetch(target, live)
    }

    fn persist(
        &mut self,
        source_tag: &str,
        events: Vec<NormalizedEvent>,
        now: DateTime<Utc>,
    ) -> Result<SourceCounts> {
        let fetched = events.len();
        let existing = self
            .store
            .get_existing(&Scope::Source(source_tag.to_string()))?;
        let plan = dedup::reconcile(events, &existing);
        let applied = if plan.has_writes() {
            self.store
                .apply_at(&plan.to_insert, &plan.to_update, now)?
        } else {
            Default::default()
        };
        let counts = SourceCounts {
            fetched,
            inserted: applied.inserted,
            updated: applied.updated,
            unchanged: plan.unchanged.len(),
        };
        tracing::info!(
            "{source_tag}: {} inserted, {} updated, {} unchanged",
            counts.inserted,
            counts.updated,
            counts.unchanged
        );
        Ok(counts)
    }

    pub fn list(&self, target: &SourceSelector) -> Result<Vec<Event>> {
        let scope = self.scope(target)?;
        self.store.get_existing(&scope)
    }

    pub fn clear(&mut self, target: &SourceSelector) -> Result<usize> {
        let scope = self.scope(target)?;
        let removed = self.store.clear(&scope)?;
        tracing::info!("cleared {removed} events");
        Ok(removed)
    }

    pub fn show(&self, target: ShowTarget) -> Result<Option<Event>> {
        self.show_at(target, Utc::now())
    }

    pub fn show_at(&self, target: ShowTarget, now: DateTime<Utc>) -> Result<Option<Event>> {
        match target {
            ShowTarget::Id(id) => self.store.get_event(id),
            ShowTarget::Random => self.store.random_event(),
            ShowTarget::Next => self.store.next_event(now),
        }
    }

    /// Collapse persisted duplicates within each source. Cross-source
    /// look-alikes are only reported.
    pub fn deduplicate(&mut self, target: &SourceSelector) -> Result<DedupReport> {
        let scope = self.scope(target)?;
        let events = self.store.get_existing(&scope)?;
        let plan = dedup::plan_deduplicate(&events);

        let removed = if plan.delete.is_empty() {
            0
        } else {
            self.store.delete(&plan.delete)?
        };
        for pair in &plan.ambiguous {
            tracing::warn!(
                "events {} and {} may be the same event from different sources: {}",
                pair.first,
                pair.second,
                pair.title
            );
        }
        tracing::info!("deduplicate removed {removed} events");

        Ok(DedupReport {
            removed,
            remaining: self.store.count(&scope)?,
            ambiguous: plan.ambiguous,
        })
    }

    pub fn sources(&self) -> Vec<SourceInfo> {
        scraping::describe(&self.sources, &self.config)
    }

    pub fn clear_cache(&self, target: &SourceSelector) -> Result<usize> {
        match target {
            SourceSelector::All => self.cache.remove(None),
            SourceSelector::One(_) => {
                let tag = self.resolve_tag(target)?;
                self.cache.remove(Some(&tag))
            }
        }
    }

    /// Canonical tag for a single named source.
    pub fn resolve_tag(&self, target: &SourceSelector) -> Result<String> {
        match target {
            SourceSelector::All => Err(PipelineError::UnknownSource("all".to_string())),
            SourceSelector::One(_) => fetch::select(&self.sources, target, &self.config)?
                .first()
                .map(|source| source.source_tag().to_string())
                .ok_or_else(|| PipelineError::UnknownSource(format!("{target:?}"))),
        }
    }

    fn scope(&self, target: &SourceSelector) -> Result<Scope> {
        match target {
            SourceSelector::All => Ok(Scope::All),
            SourceSelector::One(_) => Ok(Scope::Source(self.resolve_tag(target)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_target_parses_shortcuts_and_ids() {
        assert_eq!("r".parse::<ShowTarget>(), Ok(ShowTarget::Random));
        assert_eq!(" N ".parse::<ShowTarget>(), Ok(ShowTarget::Next));
        assert_eq!("42".parse::<ShowTarget>(), Ok(ShowTarget::Id(42)));
        assert!("soon".parse::<ShowTarget>().is_err());
    }
}
