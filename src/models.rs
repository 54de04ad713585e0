use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// Zone the aggregated sources publish local times in.
pub const TIMEZONE: Tz = chrono_tz::Europe::Oslo;

const DISPLAY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// One event as produced by a source adapter, before it is stamped and merged.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EventDraft {
    pub source_name: String,
    #[serde(default)]
    pub source_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub food: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl EventDraft {
    pub fn new(source_name: &str, title: &str, start_time: DateTime<Utc>) -> Self {
        Self {
            source_name: source_name.to_string(),
            source_id: None,
            source_url: None,
            title: title.to_string(),
            description: String::new(),
            location: None,
            food: None,
            author: None,
            start_time,
            end_time: None,
        }
    }

    pub fn stamp(self, fetched_at: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent {
            draft: self,
            fetched_at,
        }
    }
}

/// A draft carrying the timestamp of the fetch that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub draft: EventDraft,
    pub fetched_at: DateTime<Utc>,
}

/// Canonical persisted event.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub id: i64,
    #[serde(flatten)]
    pub draft: EventDraft,
    pub fetched_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn title(&self) -> &str {
        &self.draft.title
    }

    pub fn summary(&self) -> String {
        let mut line = format!(
            "[{}] {} - {}",
            self.id,
            self.draft.title,
            local(&self.draft.start_time)
        );
        if let Some(location) = self.draft.location.as_deref() {
            line.push_str(" at ");
            line.push_str(location);
        }
        line
    }

    pub fn detailed(&self) -> String {
        let d = &self.draft;
        let mut lines = vec![
            "-".repeat(80),
            format!("Id: {}", self.id),
            format!("Title: {}", d.title),
            format!("Start: {}", local(&d.start_time)),
            format!(
                "End: {}",
                d.end_time
                    .as_ref()
                    .map(local)
                    .unwrap_or_else(|| "Not specified".to_string())
            ),
            format!("Location: {}", d.location.as_deref().unwrap_or("Not specified")),
            format!("Source: {}", d.source_name),
            format!("URL: {}", d.source_url.as_deref().unwrap_or("Not available")),
        ];
        if let Some(author) = d.author.as_deref() {
            lines.push(format!("Author: {author}"));
        }
        if let Some(food) = d.food.as_deref() {
            lines.push(format!("Food: {food}"));
        }
        lines.push(format!("Fetched: {}", local(&self.fetched_at)));
        if !d.description.is_empty() {
            lines.push(String::new());
            lines.push("Description:".to_string());
            lines.push(d.description.clone());
        }
        lines.join("\n")
    }
}

fn local(at: &DateTime<Utc>) -> String {
    at.with_timezone(&TIMEZONE).format(DISPLAY_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Event {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 17, 0, 0).unwrap();
        let mut draft = EventDraft::new("peoply.app", "Quiz Night", start);
        draft.location = Some("Escape".to_string());
        draft.description = "Bring a team".to_string();
        Event {
            id: 4,
            draft,
            fetched_at: start,
            created_at: start,
        }
    }

    #[test]
    fn summary_uses_oslo_time() {
        assert_eq!(sample().summary(), "[4] Quiz Night - 2025-03-01 18:00 at Escape");
    }

    #[test]
    fn detailed_lists_placeholders_and_description() {
        let text = sample().detailed();
        assert!(text.contains("End: Not specified"));
        assert!(text.contains("URL: Not available"));
        assert!(text.ends_with("Description:\nBring a team"));
    }

    #[test]
    fn draft_deserializes_with_missing_optionals() {
        let json = r#"{"source_name":"ifinavet.no","title":"Talk","start_time":"2025-01-28T15:15:00Z"}"#;
        let draft: EventDraft = serde_json::from_str(json).expect("draft json");
        assert_eq!(draft.description, "");
        assert!(draft.source_id.is_none());
        assert!(draft.end_time.is_none());
    }
}
