use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::Value;

use super::base;
use super::SourceAdapter;
use crate::models::EventDraft;

const BASE_URL: &str = "https://api.peoply.app";
const EVENT_URL: &str = "https://peoply.app/events";
const SOURCE_TAG: &str = "peoply.app";
const PAGE_SIZE: &str = "99";
const CACHE_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEvent {
    url_id: String,
    title: String,
    #[serde(default)]
    description: Option<String>,
    start_date: DateTime<Utc>,
    #[serde(default)]
    end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    location_name: Option<String>,
    #[serde(default)]
    freeform_address: Option<String>,
    #[serde(default)]
    event_categories: Vec<EventCategory>,
    #[serde(default)]
    event_arrangers: Vec<EventArranger>,
}

#[derive(Debug, Deserialize)]
struct EventCategory {
    category: Category,
}

#[derive(Debug, Deserialize)]
struct Category {
    name: String,
}

#[derive(Debug, Deserialize)]
struct EventArranger {
    #[serde(default)]
    role: Option<String>,
    arranger: Arranger,
}

#[derive(Debug, Deserialize)]
struct Arranger {
    #[serde(default)]
    organization: Option<Organization>,
    #[serde(default)]
    user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct Organization {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct User {
    first_name: String,
    last_name: String,
}

pub struct Peoply;

impl SourceAdapter for Peoply {
    fn source_tag(&self) -> &'static str {
        SOURCE_TAG
    }

    fn alias(&self) -> &'static str {
        "peoply"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn cache_ttl(&self) -> Option<Duration> {
        Some(CACHE_TTL)
    }

    fn fetch_events(&self) -> Result<Vec<EventDraft>> {
        let url = api_url(Utc::now())?;
        let records: Vec<Value> = base::fetch_json(url.as_str())?;
        tracing::info!("peoply returned {} records", records.len());
        Ok(self.parse_records(records))
    }
}

impl Peoply {
    /// Records that do not match the expected shape are skipped.
    pub(crate) fn parse_records(&self, records: Vec<Value>) -> Vec<EventDraft> {
        let mut events = Vec::new();
        for record in records {
            match serde_json::from_value::<ApiEvent>(record) {
                Ok(api_event) => events.push(to_draft(api_event)),
                Err(err) => tracing::warn!("skipping malformed peoply event: {err}"),
            }
        }
        events
    }
}

fn api_url(after: DateTime<Utc>) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(BASE_URL)
        .and_then(|base| base.join("/events"))
        .context("invalid peoply api url")?;
    url.query_pairs_mut()
        .append_pair("afterDate", &after.to_rfc3339_opts(SecondsFormat::Millis, true))
        .append_pair("orderBy", "startDate")
        .append_pair("take", PAGE_SIZE);
    Ok(url)
}

fn to_draft(api_event: ApiEvent) -> EventDraft {
    let mut draft = EventDraft::new(SOURCE_TAG, api_event.title.trim(), api_event.start_date);
    draft.end_time = api_event.end_date;
    draft.source_url = Some(format!("{EVENT_URL}/{}", api_event.url_id));
    draft.source_id = Some(api_event.url_id);

    let mut description = api_event.description.unwrap_or_default();
    let categories: Vec<&str> = api_event
        .event_categories
        .iter()
        .map(|entry| entry.category.name.as_str())
        .collect();
    if !categories.is_empty() {
        description.push_str(&format!("\n\nCategories: {}", categories.join(", ")));
    }
    draft.description = description;

    draft.location = match (api_event.location_name, api_event.freeform_address) {
        (Some(name), Some(address)) if !address.is_empty() => Some(format!("{name}, {address}")),
        (Some(name), _) => Some(name),
        (None, address) => address,
    };

    draft.author = api_event
        .event_arrangers
        .iter()
        .find(|entry| entry.role.as_deref() == Some("ADMIN"))
        .and_then(|entry| {
            let arranger = &entry.arranger;
            arranger
                .organization
                .as_ref()
                .map(|org| org.name.clone())
                .or_else(|| {
                    arranger
                        .user
                        .as_ref()
                        .map(|user| format!("{} {}", user.first_name, user.last_name))
                })
        });

    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn sample() -> Vec<Value> {
        vec![
            json!({
                "urlId": "quiz-night-abc",
                "title": " Quiz Night ",
                "description": "Bring your friends",
                "startDate": "2025-03-01T18:00:00.000Z",
                "endDate": "2025-03-01T21:00:00.000Z",
                "locationName": "Escape",
                "freeformAddress": "Gaustadalléen 23",
                "eventCategories": [
                    {"category": {"name": "Sosialt"}},
                    {"category": {"name": "Quiz"}}
                ],
                "eventArrangers": [
                    {"role": "MEMBER", "arranger": {"organization": {"name": "Nope"}}},
                    {"role": "ADMIN", "arranger": {"organization": {"name": "Cybernetisk Selskab"}}}
                ]
            }),
            json!({
                "urlId": "lunch",
                "title": "Lunsj",
                "startDate": "2025-03-02T11:00:00Z",
                "locationName": "Kantina",
                "eventArrangers": [
                    {"role": "ADMIN", "arranger": {"user": {"firstName": "Ada", "lastName": "Lovelace"}}}
                ]
            }),
            json!({"title": "missing ids and dates"}),
        ]
    }

    #[test]
    fn parses_api_records() {
        let events = Peoply.parse_records(sample());
        assert_eq!(events.len(), 2);

        let quiz = &events[0];
        assert_eq!(quiz.source_name, "peoply.app");
        assert_eq!(quiz.title, "Quiz Night");
        assert_eq!(quiz.source_id.as_deref(), Some("quiz-night-abc"));
        assert_eq!(
            quiz.source_url.as_deref(),
            Some("https://peoply.app/events/quiz-night-abc")
        );
        assert_eq!(quiz.start_time, Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap());
        assert_eq!(quiz.location.as_deref(), Some("Escape, Gaustadalléen 23"));
        assert_eq!(
            quiz.description,
            "Bring your friends\n\nCategories: Sosialt, Quiz"
        );
        assert_eq!(quiz.author.as_deref(), Some("Cybernetisk Selskab"));

        let lunch = &events[1];
        assert_eq!(lunch.author.as_deref(), Some("Ada Lovelace"));
        assert_eq!(lunch.location.as_deref(), Some("Kantina"));
        assert!(lunch.end_time.is_none());
        assert_eq!(lunch.description, "");
    }

    #[test]
    fn api_url_encodes_after_date() {
        let after = Utc.with_ymd_and_hms(2025, 2, 20, 10, 0, 0).unwrap();
        let url = api_url(after).expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.peoply.app/events?afterDate=2025-02-20T10%3A00%3A00.000Z&orderBy=startDate&take=99"
        );
    }
}
