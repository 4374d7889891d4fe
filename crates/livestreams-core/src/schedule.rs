//! Schedule document, cache and current/upcoming derivation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::model::{ChannelId, ScheduleEntry};
use crate::store::{KeyValueStore, CHANNELS_KEY};

/// An entry still counts as upcoming while it starts more than this far
/// after `now`.
pub const LOOKAHEAD_SECS: i64 = 30;

/// Per-channel schedules keyed by channel id string, as delivered by the
/// schedule service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleDocument(pub BTreeMap<String, Vec<ScheduleEntry>>);

impl ScheduleDocument {
    pub fn entries(&self, id: ChannelId) -> &[ScheduleEntry] {
        self.0.get(&id.key()).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Order every channel's entries by start time (stable).
    pub fn normalize(&mut self) {
        for entries in self.0.values_mut() {
            entries.sort_by_key(|e| e.date);
        }
    }

    pub fn channel_count(&self) -> usize {
        self.0.len()
    }
}

/// The show on air followed by everything after it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    entries: Vec<ScheduleEntry>,
}

impl Program {
    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn current(&self) -> Option<&ScheduleEntry> {
        self.entries.first()
    }

    pub fn next(&self) -> Option<&ScheduleEntry> {
        self.entries.get(1)
    }

    pub fn upcoming(&self) -> &[ScheduleEntry] {
        if self.entries.len() > 1 {
            &self.entries[1..]
        } else {
            &[]
        }
    }
}

/// Walk `entries` in order and keep every entry starting after
/// `now + LOOKAHEAD_SECS`, preceded by the entry on air when the first kept
/// one is not the first of the list.  A non-empty list where nothing is
/// left yields its first entry alone.
pub fn current_and_upcoming(entries: &[ScheduleEntry], now: DateTime<Utc>) -> Program {
    let cutoff = now + Duration::seconds(LOOKAHEAD_SECS);
    let mut kept: Vec<ScheduleEntry> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if cutoff < entry.date {
            if kept.is_empty() && i > 0 {
                kept.push(entries[i - 1].clone());
            }
            kept.push(entry.clone());
        }
    }

    if kept.is_empty() {
        if let Some(first) = entries.first() {
            kept.push(first.clone());
        }
    }

    Program { entries: kept }
}

// ── cache ─────────────────────────────────────────────────────────────────────

/// Issued when a fetch starts; results are applied in ticket order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RefreshTicket(u64);

/// Owner of the cached schedule.  Readers take an `Arc` snapshot, so a
/// document is always seen either entirely before or entirely after a
/// replacement.
pub struct ScheduleCache {
    store: KeyValueStore,
    document: Arc<ScheduleDocument>,
    issued: u64,
    applied: u64,
}

impl ScheduleCache {
    pub fn open(store: KeyValueStore) -> Self {
        let document: ScheduleDocument = store.get(CHANNELS_KEY).unwrap_or_default();
        debug!(
            "schedule cache: loaded {} channel schedules",
            document.channel_count()
        );
        Self {
            store,
            document: Arc::new(document),
            issued: 0,
            applied: 0,
        }
    }

    pub fn snapshot(&self) -> Arc<ScheduleDocument> {
        Arc::clone(&self.document)
    }

    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.issued += 1;
        RefreshTicket(self.issued)
    }

    /// Persist and publish `document`.  Returns `Ok(false)` without touching
    /// anything when a later fetch has already been applied.
    pub fn apply(
        &mut self,
        ticket: RefreshTicket,
        document: ScheduleDocument,
    ) -> Result<bool, StoreError> {
        if ticket.0 <= self.applied {
            debug!(
                "schedule cache: dropping stale result ticket={} applied={}",
                ticket.0, self.applied
            );
            return Ok(false);
        }
        self.store.set(CHANNELS_KEY, &document)?;
        info!(
            "schedule cache: replaced document ({} channels)",
            document.channel_count()
        );
        self.document = Arc::new(document);
        self.applied = ticket.0;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, 0).unwrap()
    }

    fn abc() -> Vec<ScheduleEntry> {
        vec![
            ScheduleEntry::new(at(10, 0), "A"),
            ScheduleEntry::new(at(11, 0), "B"),
            ScheduleEntry::new(at(12, 0), "C"),
        ]
    }

    fn titles(entries: &[ScheduleEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.title.as_str()).collect()
    }

    #[test]
    fn show_on_air_leads_the_program() {
        let program = current_and_upcoming(&abc(), at(10, 45));
        assert_eq!(program.current().unwrap().title, "A");
        assert_eq!(program.next().unwrap().title, "B");
        assert_eq!(titles(program.upcoming()), vec!["B", "C"]);
    }

    #[test]
    fn exhausted_schedule_falls_back_to_first_entry() {
        let entries = vec![ScheduleEntry::new(at(9, 0), "Only")];
        let program = current_and_upcoming(&entries, at(23, 0));
        assert_eq!(program.current().unwrap().title, "Only");
        assert!(program.next().is_none());
        assert!(program.upcoming().is_empty());
    }

    #[test]
    fn exhausted_multi_entry_schedule_returns_first_not_last() {
        let program = current_and_upcoming(&abc(), at(23, 0));
        assert_eq!(titles(program.entries()), vec!["A"]);
    }

    #[test]
    fn empty_schedule_is_empty() {
        let program = current_and_upcoming(&[], at(10, 0));
        assert!(program.current().is_none());
        assert!(program.upcoming().is_empty());
    }

    #[test]
    fn entry_inside_lookahead_counts_as_started() {
        // 10:59:45 + 30s is past 11:00, so B is on air.
        let now = at(10, 59) + Duration::seconds(45);
        let program = current_and_upcoming(&abc(), now);
        assert_eq!(titles(program.entries()), vec!["B", "C"]);
    }

    #[test]
    fn nothing_started_yet_keeps_whole_list() {
        let program = current_and_upcoming(&abc(), at(8, 0));
        assert_eq!(titles(program.entries()), vec!["A", "B", "C"]);
    }

    #[test]
    fn current_is_latest_started_entry() {
        let entries = abc();
        for minute in (0..24 * 60).step_by(7) {
            let now = at(0, 0) + Duration::minutes(minute);
            let program = current_and_upcoming(&entries, now);
            let cutoff = now + Duration::seconds(LOOKAHEAD_SECS);
            let expected = entries
                .iter()
                .filter(|e| e.date <= cutoff)
                .last()
                .filter(|_| entries.iter().any(|e| cutoff < e.date))
                .or_else(|| entries.first());
            assert_eq!(program.current(), expected, "now={now}");
            assert_eq!(program.upcoming(), &program.entries()[1..], "now={now}");
        }
    }

    #[test]
    fn normalize_orders_by_start() {
        let mut doc = ScheduleDocument::default();
        doc.0.insert(
            "1".into(),
            vec![
                ScheduleEntry::new(at(12, 0), "C"),
                ScheduleEntry::new(at(10, 0), "A"),
                ScheduleEntry::new(at(11, 0), "B"),
            ],
        );
        doc.normalize();
        assert_eq!(titles(doc.entries(ChannelId(1))), vec!["A", "B", "C"]);
        assert!(doc.entries(ChannelId(2)).is_empty());
    }

    fn doc_with(title: &str) -> ScheduleDocument {
        let mut doc = ScheduleDocument::default();
        doc.0
            .insert("1".into(), vec![ScheduleEntry::new(at(10, 0), title)]);
        doc
    }

    #[test]
    fn stale_results_never_overwrite_newer_ones() {
        let mut cache = ScheduleCache::open(KeyValueStore::in_memory());
        let first = cache.begin_refresh();
        let second = cache.begin_refresh();

        assert!(cache.apply(second, doc_with("new")).unwrap());
        assert!(!cache.apply(first, doc_with("old")).unwrap());
        assert_eq!(cache.snapshot().entries(ChannelId(1))[0].title, "new");
    }

    #[test]
    fn snapshots_are_not_mutated_by_replacement() {
        let mut cache = ScheduleCache::open(KeyValueStore::in_memory());
        let ticket = cache.begin_refresh();
        cache.apply(ticket, doc_with("one")).unwrap();
        let before = cache.snapshot();

        let ticket = cache.begin_refresh();
        cache.apply(ticket, doc_with("two")).unwrap();

        assert_eq!(before.entries(ChannelId(1))[0].title, "one");
        assert_eq!(cache.snapshot().entries(ChannelId(1))[0].title, "two");
    }

    #[test]
    fn cache_reloads_persisted_document() {
        let dir = tempfile::tempdir().unwrap();
        let namespace = crate::store::PROGRAM_NAMESPACE;
        {
            let mut cache = ScheduleCache::open(KeyValueStore::open(dir.path(), namespace));
            let ticket = cache.begin_refresh();
            cache.apply(ticket, doc_with("kept")).unwrap();
        }
        let cache = ScheduleCache::open(KeyValueStore::open(dir.path(), namespace));
        assert_eq!(cache.snapshot().entries(ChannelId(1))[0].title, "kept");
    }
}
