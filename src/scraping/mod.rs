pub mod base;
pub mod navet;
pub mod peoply;

use std::time::Duration;

use serde::Serialize;

use crate::config::AppConfig;
use crate::models::EventDraft;

/// One external event source. Implementations only fetch and normalize; the
/// cache and the event store are never touched from here.
pub trait SourceAdapter: Send + Sync {
    /// Value written to `source_name` on every event, e.g. `peoply.app`.
    fn source_tag(&self) -> &'static str;
    /// Short name accepted on the command line, e.g. `peoply`.
    fn alias(&self) -> &'static str;
    fn base_url(&self) -> &'static str;
    /// Default cache lifetime. `None` forces a live fetch every time.
    fn cache_ttl(&self) -> Option<Duration>;
    fn fetch_events(&self) -> anyhow::Result<Vec<EventDraft>>;
}

#[derive(Clone, Debug, Serialize)]
pub struct SourceInfo {
    pub tag: String,
    pub alias: String,
    pub url: String,
    pub ttl_seconds: Option<u64>,
    pub enabled: bool,
}

/// Which registered sources an operation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSelector {
    All,
    One(String),
}

impl SourceSelector {
    pub fn parse(value: &str) -> Self {
        if value.eq_ignore_ascii_case("all") {
            SourceSelector::All
        } else {
            SourceSelector::One(value.to_string())
        }
    }
}

pub fn active_sources() -> Vec<Box<dyn SourceAdapter>> {
    vec![Box::new(peoply::Peoply), Box::new(navet::Navet)]
}

pub fn matches(adapter: &dyn SourceAdapter, name: &str) -> bool {
    adapter.source_tag().eq_ignore_ascii_case(name) || adapter.alias().eq_ignore_ascii_case(name)
}

pub fn describe(sources: &[Box<dyn SourceAdapter>], config: &AppConfig) -> Vec<SourceInfo> {
    sources
        .iter()
        .map(|source| SourceInfo {
            tag: source.source_tag().to_string(),
            alias: source.alias().to_string(),
            url: source.base_url().to_string(),
            ttl_seconds: config
                .ttl_for(source.source_tag(), source.cache_ttl())
                .map(|ttl| ttl.as_secs()),
            enabled: config.is_enabled(source.source_tag()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_parses_wildcard() {
        assert_eq!(SourceSelector::parse("ALL"), SourceSelector::All);
        assert_eq!(
            SourceSelector::parse("peoply"),
            SourceSelector::One("peoply".to_string())
        );
    }

    #[test]
    fn registry_matches_tag_or_alias() {
        let sources = active_sources();
        assert!(sources.iter().any(|s| matches(s.as_ref(), "navet")));
        assert!(sources.iter().any(|s| matches(s.as_ref(), "peoply.app")));
        assert!(!sources.iter().any(|s| matches(s.as_ref(), "facebook")));
    }

    #[test]
    fn describe_applies_config() {
        let mut config = AppConfig::default();
        config.set_enabled("ifinavet.no", false);
        config.cache_ttl_seconds.insert("peoply.app".into(), 42);
        let info = describe(&active_sources(), &config);
        let peoply = info.iter().find(|i| i.alias == "peoply").expect("peoply");
        let navet = info.iter().find(|i| i.alias == "navet").expect("navet");
        assert_eq!(peoply.ttl_seconds, Some(42));
        assert!(peoply.enabled);
        assert!(!navet.enabled);
    }
}
