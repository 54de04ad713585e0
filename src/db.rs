use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Params, Row};

use crate::dedup::EventUpdate;
use crate::error::{PipelineError, Result};
use crate::models::{Event, EventDraft, NormalizedEvent};
use crate::utils;

const COLUMNS: &str = "id, source_name, source_id, source_url, title, description, location, \
                       food, author, start_time, end_time, fetched_at, created_at";

/// Which persisted events an operation covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    All,
    Source(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyCounts {
    pub inserted: usize,
    pub updated: usize,
}

/// Sole writer of the event table.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        utils::ensure_parent(path)?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    // No unique index on (source_name, source_id): deduplicate has to be able
    // to see duplicates that got in.
    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_name TEXT NOT NULL,
                source_id TEXT,
                source_url TEXT,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                location TEXT,
                food TEXT,
                author TEXT,
                start_time TEXT NOT NULL,
                end_time TEXT,
                fetched_at TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_source_name ON events(source_name);
            CREATE INDEX IF NOT EXISTS events_start_time ON events(start_time);",
        )
    }

    pub fn get_existing(&self, scope: &Scope) -> Result<Vec<Event>> {
        match scope {
            Scope::All => self.query_events(
                &format!("SELECT {COLUMNS} FROM events ORDER BY start_time, id"),
                [],
            ),
            Scope::Source(name) => self.query_events(
                &format!(
                    "SELECT {COLUMNS} FROM events WHERE source_name = ?1 ORDER BY start_time, id"
                ),
                params![name],
            ),
        }
    }

    pub fn count(&self, scope: &Scope) -> Result<usize> {
        let count: i64 = match scope {
            Scope::All => self
                .conn
                .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?,
            Scope::Source(name) => self.conn.query_row(
                "SELECT COUNT(*) FROM events WHERE source_name = ?1",
                params![name],
                |row| row.get(0),
            )?,
        };
        Ok(count as usize)
    }

    pub fn get_event(&self, id: i64) -> Result<Option<Event>> {
        self.query_one(
            &format!("SELECT {COLUMNS} FROM events WHERE id = ?1"),
            params![id],
        )
    }

    pub fn random_event(&self) -> Result<Option<Event>> {
        self.query_one(
            &format!("SELECT {COLUMNS} FROM events ORDER BY RANDOM() LIMIT 1"),
            [],
        )
    }

    /// Soonest event starting strictly after `now`.
    pub fn next_event(&self, now: DateTime<Utc>) -> Result<Option<Event>> {
        self.query_one(
            &format!(
                "SELECT {COLUMNS} FROM events WHERE start_time > ?1 ORDER BY start_time, id LIMIT 1"
            ),
            params![now],
        )
    }

    /// Write one reconciled batch. All rows commit together or none do.
    pub fn apply(
        &mut self,
        to_insert: &[NormalizedEvent],
        to_update: &[EventUpdate],
    ) -> Result<ApplyCounts> {
        self.apply_at(to_insert, to_update, Utc::now())
    }

    pub fn apply_at(
        &mut self,
        to_insert: &[NormalizedEvent],
        to_update: &[EventUpdate],
        now: DateTime<Utc>,
    ) -> Result<ApplyCounts> {
        let tx = self.conn.transaction()?;
        let mut counts = ApplyCounts::default();
        {
            let mut insert = tx.prepare(
                "INSERT INTO events (source_name, source_id, source_url, title, description,
                    location, food, author, start_time, end_time, fetched_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for event in to_insert {
                let d = &event.draft;
                let created_at = now.min(event.fetched_at);
                insert.execute(params![
                    d.source_name,
                    d.source_id,
                    d.source_url,
                    d.title,
                    d.description,
                    d.location,
                    d.food,
                    d.author,
                    d.start_time,
                    d.end_time,
                    event.fetched_at,
                    created_at
                ])?;
                counts.inserted += 1;
            }

            // source_name and created_at are never rewritten.
            let mut update = tx.prepare(
                "UPDATE events SET source_id = ?2, source_url = ?3, title = ?4,
                    description = ?5, location = ?6, food = ?7, author = ?8,
                    start_time = ?9, end_time = ?10, fetched_at = ?11
                 WHERE id = ?1",
            )?;
            for change in to_update {
                let d = &change.draft;
                let affected = update.execute(params![
                    change.id,
                    d.source_id,
                    d.source_url,
                    d.title,
                    d.description,
                    d.location,
                    d.food,
                    d.author,
                    d.start_time,
                    d.end_time,
                    change.fetched_at
                ])?;
                if affected == 0 {
                    return Err(PipelineError::MissingEvent(change.id));
                }
                counts.updated += 1;
            }
        }
        tx.commit()?;
        Ok(counts)
    }

    /// Irreversibly delete every event in `scope`.
    pub fn clear(&mut self, scope: &Scope) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let removed = match scope {
            Scope::All => tx.execute("DELETE FROM events", [])?,
            Scope::Source(name) => {
                tx.execute("DELETE FROM events WHERE source_name = ?1", params![name])?
            }
        };
        tx.commit()?;
        Ok(removed)
    }

    pub fn delete(&mut self, ids: &[i64]) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM events WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    fn query_events<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Event>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, event_from_row)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn query_one<P: Params>(&self, sql: &str, params: P) -> Result<Option<Event>> {
        Ok(self
            .conn
            .query_row(sql, params, event_from_row)
            .optional()?)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        draft: EventDraft {
            source_name: row.get(1)?,
            source_id: row.get(2)?,
            source_url: row.get(3)?,
            title: row.get(4)?,
            description: row.get(5)?,
            location: row.get(6)?,
            food: row.get(7)?,
            author: row.get(8)?,
            start_time: row.get(9)?,
            end_time: row.get(10)?,
        },
        fetched_at: row.get(11)?,
        created_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 2, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn draft(source: &str, id: &str, title: &str, start: DateTime<Utc>) -> EventDraft {
        let mut draft = EventDraft::new(source, title, start);
        draft.source_id = Some(id.to_string());
        draft.end_time = Some(start + ChronoDuration::hours(2));
        draft
    }

    #[test]
    fn insert_roundtrips_all_fields() {
        let mut store = Store::open_in_memory().expect("store");
        let mut d = draft("peoply.app", "p1", "Quiz Night", at(28, 17));
        d.location = Some("Escape".into());
        d.food = Some("Pizza".into());
        d.author = Some("Cybernetisk Selskab".into());
        d.source_url = Some("https://peoply.app/events/p1".into());
        let counts = store
            .apply_at(&[d.clone().stamp(at(20, 10))], &[], at(20, 11))
            .expect("apply");
        assert_eq!(counts, ApplyCounts { inserted: 1, updated: 0 });

        let events = store.get_existing(&Scope::All).expect("existing");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].draft, d);
        assert_eq!(events[0].fetched_at, at(20, 10));
        // created_at never runs ahead of fetched_at
        assert_eq!(events[0].created_at, at(20, 10));
    }

    #[test]
    fn update_keeps_id_created_at_and_source_name() {
        let mut store = Store::open_in_memory().expect("store");
        store
            .apply_at(
                &[draft("peoply.app", "p1", "Quiz", at(28, 17)).stamp(at(20, 10))],
                &[],
                at(20, 10),
            )
            .expect("insert");
        let original = store.get_existing(&Scope::All).expect("existing").remove(0);

        let update = EventUpdate {
            id: original.id,
            draft: draft("peoply.app", "p1", "Quiz (moved)", at(28, 18)),
            fetched_at: at(21, 9),
        };
        store.apply_at(&[], &[update], at(21, 9)).expect("update");

        let after = store
            .get_event(original.id)
            .expect("lookup")
            .expect("still there");
        assert_eq!(after.title(), "Quiz (moved)");
        assert_eq!(after.created_at, original.created_at);
        assert_eq!(after.fetched_at, at(21, 9));
    }

    #[test]
    fn failed_update_rolls_back_whole_batch() {
        let mut store = Store::open_in_memory().expect("store");
        let insert = draft("peoply.app", "p1", "Quiz", at(28, 17)).stamp(at(20, 10));
        let bogus = EventUpdate {
            id: 404,
            draft: draft("peoply.app", "p9", "Ghost", at(28, 17)),
            fetched_at: at(21, 9),
        };
        let err = store
            .apply_at(&[insert], &[bogus], at(21, 9))
            .expect_err("missing id must fail");
        assert!(matches!(err, PipelineError::MissingEvent(404)));
        assert!(err.is_fatal());
        assert_eq!(store.count(&Scope::All).expect("count"), 0);
    }

    #[test]
    fn clear_by_source_and_all() {
        let mut store = Store::open_in_memory().expect("store");
        let batch = vec![
            draft("peoply.app", "p1", "A", at(28, 17)).stamp(at(20, 10)),
            draft("ifinavet.no", "n1", "B", at(28, 17)).stamp(at(20, 10)),
        ];
        store.apply_at(&batch, &[], at(20, 10)).expect("apply");

        let removed = store
            .clear(&Scope::Source("peoply.app".into()))
            .expect("clear source");
        assert_eq!(removed, 1);
        assert_eq!(store.count(&Scope::All).expect("count"), 1);

        store.clear(&Scope::All).expect("clear all");
        assert!(store.get_existing(&Scope::All).expect("existing").is_empty());
    }

    #[test]
    fn next_event_skips_past_and_random_finds_something() {
        let mut store = Store::open_in_memory().expect("store");
        assert!(store.random_event().expect("random").is_none());
        let batch = vec![
            draft("peoply.app", "past", "Past", at(1, 17)).stamp(at(1, 10)),
            draft("peoply.app", "late", "Later", at(27, 17)).stamp(at(1, 10)),
            draft("peoply.app", "soon", "Sooner", at(25, 17)).stamp(at(1, 10)),
        ];
        store.apply_at(&batch, &[], at(1, 10)).expect("apply");

        let next = store.next_event(at(10, 0)).expect("next").expect("upcoming");
        assert_eq!(next.title(), "Sooner");
        assert!(store.next_event(at(28, 0)).expect("next").is_none());
        assert!(store.random_event().expect("random").is_some());
    }

    #[test]
    fn overlapping_writers_do_not_corrupt_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.sqlite");
        let mut first = Store::open(&path).expect("first handle");
        let mut second = Store::open(&path).expect("second handle");
        let scope = Scope::Source("peoply.app".into());

        // Both read before either writes, then both apply the same new event.
        let seen_first = first.get_existing(&scope).expect("read");
        let seen_second = second.get_existing(&scope).expect("read");
        let incoming = vec![draft("peoply.app", "p1", "Quiz", at(28, 17)).stamp(at(20, 10))];
        let plan_first = dedup::reconcile(incoming.clone(), &seen_first);
        let plan_second = dedup::reconcile(incoming, &seen_second);
        first
            .apply(&plan_first.to_insert, &plan_first.to_update)
            .expect("first apply");
        second
            .apply(&plan_second.to_insert, &plan_second.to_update)
            .expect("second apply");

        // The race shows up as a duplicate, which deduplicate can repair.
        let events = first.get_existing(&scope).expect("read back");
        assert_eq!(events.len(), 2);
        assert_ne!(events[0].id, events[1].id);
        assert!(events.iter().all(|e| e.title() == "Quiz"));
        let plan = dedup::plan_deduplicate(&events);
        first.delete(&plan.delete).expect("delete");
        assert_eq!(second.count(&scope).expect("count"), 1);
    }
}
