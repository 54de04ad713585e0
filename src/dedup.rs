//! Identity and merge decisions for events.
//!
//! Nothing here touches storage. [`reconcile`] classifies a freshly fetched
//! batch against what is already persisted, and [`plan_deduplicate`] works
//! out which persisted records collapse into one. The gateway in
//! [`crate::db`] applies the results.
//!
//! Identity, first decisive rule wins:
//!
//! 1. same source and same native id (`source_id`, else `source_url`);
//!    differing native ids of the same kind mean different events
//! 2. same source, same normalized title, start in the same calendar minute
//! 3. across sources: same normalized title with overlapping time spans.
//!    Only ever reported, see [`IdentityAmbiguous`].
//!
//! Merging is timestamp based: the record with the strictly greater
//! `fetched_at` wins every content field, ties keep the stored record. There
//! is no field-level quality scoring.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::{Event, EventDraft, NormalizedEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NativeMatch {
    Same,
    Different,
    Unknown,
}

pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn same_minute(a: &DateTime<Utc>, b: &DateTime<Utc>) -> bool {
    a.timestamp().div_euclid(60) == b.timestamp().div_euclid(60)
}

fn native_match(a: &EventDraft, b: &EventDraft) -> NativeMatch {
    let pairs = [
        (a.source_id.as_deref(), b.source_id.as_deref()),
        (a.source_url.as_deref(), b.source_url.as_deref()),
    ];
    for pair in pairs {
        if let (Some(x), Some(y)) = pair {
            return if x == y {
                NativeMatch::Same
            } else {
                NativeMatch::Different
            };
        }
    }
    NativeMatch::Unknown
}

/// Rules 1 and 2: are `a` and `b` the same logical event within one source?
pub fn same_logical_event(a: &EventDraft, b: &EventDraft) -> bool {
    if a.source_name != b.source_name {
        return false;
    }
    match native_match(a, b) {
        NativeMatch::Same => true,
        NativeMatch::Different => false,
        NativeMatch::Unknown => {
            normalize_title(&a.title) == normalize_title(&b.title)
                && same_minute(&a.start_time, &b.start_time)
        }
    }
}

fn span(draft: &EventDraft) -> (DateTime<Utc>, DateTime<Utc>) {
    let end = draft
        .end_time
        .filter(|end| *end > draft.start_time)
        .unwrap_or(draft.start_time);
    (draft.start_time, end)
}

/// Rule 3: a possible duplicate published by two different sources.
pub fn cross_source_candidate(a: &EventDraft, b: &EventDraft) -> bool {
    if a.source_name == b.source_name {
        return false;
    }
    if normalize_title(&a.title) != normalize_title(&b.title) {
        return false;
    }
    let (a_start, a_end) = span(a);
    let (b_start, b_end) = span(b);
    a_start <= b_end && b_start <= a_end
}

/// New content for an already persisted record. `id` and `created_at` stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventUpdate {
    pub id: i64,
    pub draft: EventDraft,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub to_insert: Vec<NormalizedEvent>,
    pub to_update: Vec<EventUpdate>,
    pub unchanged: Vec<i64>,
}

impl Reconciliation {
    pub fn has_writes(&self) -> bool {
        !self.to_insert.is_empty() || !self.to_update.is_empty()
    }
}

/// Classify `incoming` against `existing` into inserts, updates and no-ops.
///
/// Existing records that nothing in `incoming` matches are left out of the
/// result entirely; a fetch never deletes.
pub fn reconcile(incoming: Vec<NormalizedEvent>, existing: &[Event]) -> Reconciliation {
    // Newest incoming record per matched existing index. `None` while the
    // stored record is still the winner.
    let mut matched: BTreeMap<usize, Option<NormalizedEvent>> = BTreeMap::new();
    let mut to_insert: Vec<NormalizedEvent> = Vec::new();

    for event in incoming {
        if let Some(idx) = existing
            .iter()
            .position(|stored| same_logical_event(&stored.draft, &event.draft))
        {
            let slot = matched.entry(idx).or_insert(None);
            let current = slot
                .as_ref()
                .map(|winner| winner.fetched_at)
                .unwrap_or(existing[idx].fetched_at);
            if event.fetched_at > current {
                *slot = Some(event);
            }
            continue;
        }

        if let Some(pending) = to_insert
            .iter_mut()
            .find(|pending| same_logical_event(&pending.draft, &event.draft))
        {
            if event.fetched_at > pending.fetched_at {
                *pending = event;
            }
            continue;
        }

        to_insert.push(event);
    }

    let mut to_update = Vec::new();
    let mut unchanged = Vec::new();
    for (idx, winner) in matched {
        let stored = &existing[idx];
        match winner {
            Some(winner) if winner.draft != stored.draft => to_update.push(EventUpdate {
                id: stored.id,
                draft: winner.draft,
                fetched_at: winner.fetched_at,
            }),
            _ => unchanged.push(stored.id),
        }
    }
    to_update.sort_by_key(|update| update.id);
    unchanged.sort_unstable();

    Reconciliation {
        to_insert,
        to_update,
        unchanged,
    }
}

/// Two surviving records from different sources that look like one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityAmbiguous {
    pub first: i64,
    pub second: i64,
    pub title: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DedupPlan {
    pub keep: Vec<i64>,
    pub delete: Vec<i64>,
    pub ambiguous: Vec<IdentityAmbiguous>,
}

/// Collapse same-source duplicates onto the freshest record.
///
/// Preference is greatest `fetched_at`, then greatest `id`. Candidates are
/// compared against survivors only, so a chain a~b~c where a and c do not
/// match on their own may leave two survivors.
pub fn plan_deduplicate(events: &[Event]) -> DedupPlan {
    let mut ordered: Vec<&Event> = events.iter().collect();
    ordered.sort_by(|a, b| {
        b.fetched_at
            .cmp(&a.fetched_at)
            .then_with(|| b.id.cmp(&a.id))
    });

    let mut survivors: Vec<&Event> = Vec::new();
    let mut delete = Vec::new();
    for event in ordered {
        let duplicate_of = survivors
            .iter()
            .find(|survivor| same_logical_event(&survivor.draft, &event.draft));
        match duplicate_of {
            Some(survivor) => {
                tracing::debug!(
                    "event {} duplicates {} ({})",
                    event.id,
                    survivor.id,
                    survivor.title()
                );
                delete.push(event.id);
            }
            None => survivors.push(event),
        }
    }

    let mut ambiguous = Vec::new();
    for (i, a) in survivors.iter().enumerate() {
        for b in &survivors[i + 1..] {
            if cross_source_candidate(&a.draft, &b.draft) {
                let (first, second) = if a.id < b.id { (a, b) } else { (b, a) };
                ambiguous.push(IdentityAmbiguous {
                    first: first.id,
                    second: second.id,
                    title: first.draft.title.clone(),
                });
            }
        }
    }
    ambiguous.sort_by_key(|pair| (pair.first, pair.second));

    let mut keep: Vec<i64> = survivors.iter().map(|event| event.id).collect();
    keep.sort_unstable();
    delete.sort_unstable();

    DedupPlan {
        keep,
        delete,
        ambiguous,
    }
}
