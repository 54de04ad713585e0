use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use super::base;
use super::SourceAdapter;
use crate::models::{EventDraft, TIMEZONE};

const BASE_URL: &str = "https://ifinavet.no";
const SOURCE_TAG: &str = "ifinavet.no";
const PLACEHOLDER_DESCRIPTION: &str = "Mer info kommer";
const CACHE_TTL: Duration = Duration::from_secs(6 * 60 * 60);
const DEFAULT_LENGTH_HOURS: i64 = 2;

static CONTAINER_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.event-list-container").expect("navet container selector"));
static CARD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.event-list-item-wrapper").expect("navet card selector"));
static TITLE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.event-list-item-description h3.event-list-item-title a")
        .expect("navet title selector")
});
static DESCRIPTION_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.event-list-item-description p").expect("navet description selector")
});
static META_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.event-list-item-details div.event-list-item-meta")
        .expect("navet meta selector")
});
static LOGO_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("img").expect("navet logo selector"));
static SPAN_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("span").expect("navet span selector"));
static DETAIL_META_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.container div.card div.event-meta").expect("navet detail meta selector")
});
static DETAIL_CARD_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("div.container div.card").expect("navet detail card selector"));
static HEADING_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h2").expect("navet heading selector"));
static STATUS_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h3.event-status").expect("navet status selector"));
static LIST_ITEM_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("li").expect("navet list item selector"));
static PARAGRAPH_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("p").expect("navet paragraph selector"));
static COMPANY_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.container div.company-card div.company-info")
        .expect("navet company selector")
});

static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\.(\d{1,2})").expect("navet date regex"));
static TIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})[:.](\d{2})").expect("navet time regex"));
static ONCLICK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"location\.href\s*=\s*'([^']+)'").expect("navet onclick regex"));

/// What a detail page adds on top of the listing card.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct Details {
    pub location: Option<String>,
    pub food: Option<String>,
    /// Full description; replaces the card teaser.
    pub body: Option<String>,
    pub registration: Option<String>,
    /// "Om <company>:" followed by the company blurb.
    pub company: Option<String>,
}

pub struct Navet;

impl SourceAdapter for Navet {
    fn source_tag(&self) -> &'static str {
        SOURCE_TAG
    }

    fn alias(&self) -> &'static str {
        "navet"
    }

    fn base_url(&self) -> &'static str {
        BASE_URL
    }

    fn cache_ttl(&self) -> Option<Duration> {
        Some(CACHE_TTL)
    }

    fn fetch_events(&self) -> Result<Vec<EventDraft>> {
        let today = Utc::now().with_timezone(&TIMEZONE).date_naive();
        let url = listing_url(today);
        let html = base::fetch_html(&url)?;
        let mut events = self.parse_listing(&html, today.year())?;

        // A failed detail page keeps the card data.
        for event in &mut events {
            let Some(url) = event.source_url.clone() else {
                continue;
            };
            match base::fetch_html(&url) {
                Ok(page) => apply_details(event, self.parse_details(&page)),
                Err(err) => tracing::warn!("navet details unavailable for {url}: {err:#}"),
            }
        }
        Ok(events)
    }
}

impl Navet {
    pub(crate) fn parse_listing(&self, html: &str, year: i32) -> Result<Vec<EventDraft>> {
        let document = Html::parse_document(html);
        let container = document
            .select(&CONTAINER_SELECTOR)
            .next()
            .ok_or_else(|| anyhow!("navet listing has no event container"))?;

        let mut events = Vec::new();
        for card in container.select(&CARD_SELECTOR) {
            match parse_card(&card, year) {
                Some(event) => events.push(event),
                None => tracing::warn!("skipping navet card without title or date"),
            }
        }
        tracing::debug!("parsed {} navet cards", events.len());
        Ok(events)
    }

    pub(crate) fn parse_details(&self, html: &str) -> Details {
        let document = Html::parse_document(html);
        let mut details = Details::default();
        for meta in document.select(&DETAIL_META_SELECTOR) {
            let Some(value) = value_span(&meta) else {
                continue;
            };
            match icon_class(&meta).as_deref() {
                Some(icon) if icon.contains("icon-location") => details.location = Some(value),
                Some(icon) if icon.contains("icon-spoon-knife") => details.food = Some(value),
                _ => {}
            }
        }

        if let Some(card) = document.select(&DETAIL_CARD_SELECTOR).next() {
            details.body = detail_body(&card);
            details.registration = base::first_text(&card, &STATUS_SELECTOR)
                .filter(|status| status.to_lowercase().contains("påmelding"));
        }
        details.company = document
            .select(&COMPANY_SELECTOR)
            .next()
            .and_then(|info| company_block(&info));
        details
    }
}

/// The card heading plus the paragraphs and lists that follow it.
fn detail_body(card: &ElementRef<'_>) -> Option<String> {
    let heading = card.select(&HEADING_SELECTOR).next()?;
    let mut parts = vec![base::inner_text(heading)];
    for sibling in heading.next_siblings().filter_map(ElementRef::wrap) {
        let part = match sibling.value().name() {
            "ul" => sibling
                .select(&LIST_ITEM_SELECTOR)
                .map(|item| format!("- {}", base::inner_text(item)))
                .collect::<Vec<_>>()
                .join("\n"),
            "p" => paragraph_text(&sibling),
            _ => continue,
        };
        parts.push(part);
    }
    parts.retain(|part| !part.is_empty());
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("\n\n"))
    }
}

/// Paragraph text with link targets written out as `text (href)`.
fn paragraph_text(paragraph: &ElementRef<'_>) -> String {
    let mut text = String::new();
    for child in paragraph.children() {
        if let Some(fragment) = child.value().as_text() {
            text.push_str(fragment);
        } else if let Some(element) = ElementRef::wrap(child) {
            let inner = base::inner_text(element);
            match element.value().attr("href") {
                Some(href) if element.value().name() == "a" && !href.is_empty() && href != inner => {
                    text.push_str(&format!("{inner} ({href})"));
                }
                _ => text.push_str(&inner),
            }
        }
    }
    base::clean_text(&text)
}

fn company_block(info: &ElementRef<'_>) -> Option<String> {
    let mut lines = Vec::new();
    if let Some(name) = base::first_text(info, &HEADING_SELECTOR) {
        lines.push(format!("Om {name}:"));
    }
    if let Some(blurb) = base::first_text(info, &PARAGRAPH_SELECTOR) {
        lines.push(blurb);
    }
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn listing_url(today: NaiveDate) -> String {
    let semester = if today.month() <= 6 { "var" } else { "host" };
    format!("{BASE_URL}/arrangementer/{}/{semester}/", today.year())
}

fn parse_card(card: &ElementRef<'_>, year: i32) -> Option<EventDraft> {
    let title = base::first_text(card, &TITLE_SELECTOR)?;

    let mut date_text = None;
    let mut time_text = None;
    for meta in card.select(&META_SELECTOR) {
        let Some(value) = value_span(&meta) else {
            continue;
        };
        match icon_class(&meta).as_deref() {
            Some(icon) if icon.contains("icon-calendar") => date_text = Some(value),
            Some(icon) if icon.contains("icon-clock") => time_text = Some(value),
            _ => {}
        }
    }

    let start_time = parse_start(date_text.as_deref()?, time_text.as_deref()?, year)?;
    let mut draft = EventDraft::new(SOURCE_TAG, &title, start_time);
    draft.end_time = Some(start_time + ChronoDuration::hours(DEFAULT_LENGTH_HOURS));
    draft.description = base::first_text(card, &DESCRIPTION_SELECTOR)
        .unwrap_or_else(|| PLACEHOLDER_DESCRIPTION.to_string());
    draft.source_url = card
        .value()
        .attr("onclick")
        .and_then(|onclick| ONCLICK_RE.captures(onclick))
        .and_then(|caps| base::absolute_url(BASE_URL, Some(caps[1].to_string())))
        .or_else(|| base::absolute_url(BASE_URL, base::first_attr(card, &TITLE_SELECTOR, "href")));
    draft.author = base::first_attr(card, &LOGO_SELECTOR, "alt").filter(|alt| !alt.is_empty());
    Some(draft)
}

/// "tirsdag 28.01" + "16:15" in local time.
fn parse_start(date_text: &str, time_text: &str, year: i32) -> Option<DateTime<Utc>> {
    let date_caps = DATE_RE.captures(date_text)?;
    let day: u32 = date_caps[1].parse().ok()?;
    let month: u32 = date_caps[2].parse().ok()?;
    let time_caps = TIME_RE.captures(time_text)?;
    let hour: u32 = time_caps[1].parse().ok()?;
    let minute: u32 = time_caps[2].parse().ok()?;

    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    base::local_to_utc(date, time)
}

fn icon_class(meta: &ElementRef<'_>) -> Option<String> {
    meta.select(&SPAN_SELECTOR)
        .filter_map(|span| span.value().attr("class"))
        .find(|class| class.split_whitespace().any(|c| c.starts_with("icon-")))
        .map(str::to_string)
}

/// The value is the first span without a class; icon and sr-only spans have one.
fn value_span(meta: &ElementRef<'_>) -> Option<String> {
    meta.select(&SPAN_SELECTOR)
        .find(|span| span.value().attr("class").is_none())
        .map(base::inner_text)
        .filter(|text| !text.is_empty())
}

fn apply_details(event: &mut EventDraft, details: Details) {
    if details.location.is_some() {
        event.location = details.location;
    }
    if details.food.is_some() {
        event.food = details.food;
    }
    if let Some(body) = details.body {
        event.description = body;
    }
    if let Some(status) = details.registration {
        event.description.push_str(&format!("\n\nPåmeldingsstatus: {status}"));
    }
    if let Some(company) = details.company {
        event.description.push_str(&format!("\n\n{company}"));
    }
}
