//! Deterministic per-record merge used by the merge server.
//!
//! Each collection is merged independently: canonical records keep their
//! position, unknown incoming ids are appended in incoming order, and a known id
//! is replaced only when the incoming `timestamp` is strictly greater. Nothing is
//! ever deleted, so every id seen on either side survives.

use std::collections::HashMap;
use std::ops::AddAssign;

use serde::Serialize;

use crate::models::{CollectionKind, Record, RecordId, Snapshot};

/// What a merge did, summed over collections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Incoming records with a previously unknown id.
    pub inserted: usize,
    /// Canonical records overwritten by a newer incoming version.
    pub replaced: usize,
    /// Incoming records that differed from canonical but lost the timestamp race.
    pub stale: usize,
    /// Incoming records without a usable id.
    pub skipped: usize,
}

impl MergeReport {
    /// Whether the canonical state was left untouched.
    pub const fn is_noop(&self) -> bool {
        self.inserted == 0 && self.replaced == 0
    }
}

impl AddAssign for MergeReport {
    fn add_assign(&mut self, other: Self) {
        self.inserted += other.inserted;
        self.replaced += other.replaced;
        self.stale += other.stale;
        self.skipped += other.skipped;
    }
}

/// Merge one incoming collection into its canonical counterpart.
pub fn merge_collection(canonical: &[Record], incoming: &[Record]) -> (Vec<Record>, MergeReport) {
    let mut merged = canonical.to_vec();
    let mut index: HashMap<RecordId, usize> = HashMap::with_capacity(merged.len());
    for (position, record) in merged.iter().enumerate() {
        if let Some(id) = record.id() {
            // Duplicate canonical ids: the first occurrence is the one that is kept up to date.
            index.entry(id).or_insert(position);
        }
    }

    let mut report = MergeReport::default();
    for record in incoming {
        let Some(id) = record.id() else {
            report.skipped += 1;
            continue;
        };

        match index.get(&id) {
            None => {
                index.insert(id, merged.len());
                merged.push(record.clone());
                report.inserted += 1;
            }
            Some(&position) => {
                let existing = &merged[position];
                if existing == record {
                    continue;
                }
                if is_newer(record, existing) {
                    merged[position] = record.clone();
                    report.replaced += 1;
                } else {
                    report.stale += 1;
                }
            }
        }
    }

    (merged, report)
}

/// Merge every collection of `incoming` into `canonical`.
pub fn merge_snapshots(canonical: &Snapshot, incoming: &Snapshot) -> (Snapshot, MergeReport) {
    let mut merged = Snapshot::default();
    let mut report = MergeReport::default();

    for kind in CollectionKind::ALL {
        let (records, collection_report) =
            merge_collection(canonical.collection(kind), incoming.collection(kind));
        if !collection_report.is_noop() || collection_report.skipped > 0 {
            tracing::debug!(
                collection = %kind,
                inserted = collection_report.inserted,
                replaced = collection_report.replaced,
                stale = collection_report.stale,
                skipped = collection_report.skipped,
                "Merged collection"
            );
        }
        *merged.collection_mut(kind) = records;
        report += collection_report;
    }

    (merged, report)
}

/// Last-write-wins: only a strictly greater timestamp replaces, and records
/// without a numeric timestamp never do.
fn is_newer(incoming: &Record, existing: &Record) -> bool {
    match (incoming.conflict_time(), existing.conflict_time()) {
        (Some(incoming), Some(existing)) => incoming > existing,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};

    use super::*;

    fn record(value: Value) -> Record {
        Record::from_value(value).unwrap()
    }

    fn posts(values: &[Value]) -> Snapshot {
        Snapshot {
            posts: values.iter().cloned().map(record).collect(),
            ..Snapshot::default()
        }
    }

    /// Collections compared as sets: full records, ordered by id.
    fn as_sets(snapshot: &Snapshot) -> Vec<(CollectionKind, Vec<Record>)> {
        CollectionKind::ALL
            .into_iter()
            .map(|kind| {
                let mut records = snapshot.collection(kind).to_vec();
                records.sort_by_key(Record::id);
                (kind, records)
            })
            .collect()
    }

    #[test]
    fn newer_incoming_timestamp_wins() {
        let canonical = posts(&[json!({"id": 1, "timestamp": 100, "v": "a"})]);
        let incoming = posts(&[json!({"id": 1, "timestamp": 200, "v": "b"})]);

        let (merged, report) = merge_snapshots(&canonical, &incoming);
        assert_eq!(merged.posts[0].get_str("v"), Some("b"));
        assert_eq!(report.replaced, 1);
    }

    #[test]
    fn older_incoming_timestamp_loses() {
        let canonical = posts(&[json!({"id": 1, "timestamp": 100, "v": "a"})]);
        let incoming = posts(&[json!({"id": 1, "timestamp": 50, "v": "z"})]);

        let (merged, report) = merge_snapshots(&canonical, &incoming);
        assert_eq!(merged.posts[0].get_str("v"), Some("a"));
        assert_eq!(report.stale, 1);
        assert!(report.is_noop());
    }

    #[test]
    fn equal_timestamps_keep_canonical() {
        let canonical = posts(&[json!({"id": 1, "timestamp": 100, "v": "a"})]);
        let incoming = posts(&[json!({"id": 1, "timestamp": 100, "v": "b"})]);

        let (merged, _) = merge_snapshots(&canonical, &incoming);
        assert_eq!(merged, canonical);
    }

    #[test]
    fn records_without_timestamp_never_replace() {
        let canonical = posts(&[json!({"id": 1, "v": "a"})]);
        let incoming = posts(&[json!({"id": 1, "timestamp": 999, "v": "b"})]);
        let (merged, _) = merge_snapshots(&canonical, &incoming);
        assert_eq!(merged.posts[0].get_str("v"), Some("a"));

        let canonical = posts(&[json!({"id": 1, "timestamp": 5, "v": "a"})]);
        let incoming = posts(&[json!({"id": 1, "v": "b"})]);
        let (merged, _) = merge_snapshots(&canonical, &incoming);
        assert_eq!(merged.posts[0].get_str("v"), Some("a"));
    }

    #[test]
    fn fractional_timestamps_compare_numerically() {
        let canonical = posts(&[json!({"id": 1, "timestamp": 1, "v": "a"})]);

        let (merged, report) =
            merge_snapshots(&canonical, &posts(&[json!({"id": 1, "timestamp": 1.5, "v": "b"})]));
        assert_eq!(merged.posts[0].get_str("v"), Some("b"));
        assert_eq!(report.replaced, 1);

        let (merged, _) =
            merge_snapshots(&merged, &posts(&[json!({"id": 1, "timestamp": 1.25, "v": "c"})]));
        assert_eq!(merged.posts[0].get_str("v"), Some("b"));
    }

    #[test]
    fn unknown_ids_are_inserted() {
        let incoming = posts(&[json!({"id": 5, "timestamp": 1})]);
        let (merged, report) = merge_snapshots(&Snapshot::default(), &incoming);
        assert_eq!(merged.posts, vec![record(json!({"id": 5, "timestamp": 1}))]);
        assert_eq!(report.inserted, 1);
    }

    #[test]
    fn numeric_and_text_ids_do_not_collide() {
        let canonical = posts(&[json!({"id": 1, "timestamp": 1})]);
        let incoming = posts(&[json!({"id": "1", "timestamp": 2})]);
        let (merged, report) = merge_snapshots(&canonical, &incoming);
        assert_eq!(merged.posts.len(), 2);
        assert_eq!(report.inserted, 1);
    }

    #[test]
    fn records_without_id_are_skipped() {
        let incoming = posts(&[json!({"timestamp": 1, "v": "orphan"})]);
        let (merged, report) = merge_snapshots(&Snapshot::default(), &incoming);
        assert!(merged.posts.is_empty());
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn merge_is_idempotent() {
        let canonical = posts(&[
            json!({"id": 1, "timestamp": 100, "v": "a"}),
            json!({"id": 2, "timestamp": 100, "v": "a"}),
        ]);
        let incoming = posts(&[
            json!({"id": 2, "timestamp": 300, "v": "b"}),
            json!({"id": 3, "timestamp": 1}),
            json!({"id": 1, "timestamp": 10, "v": "old"}),
        ]);

        let (once, _) = merge_snapshots(&canonical, &incoming);
        let (twice, report) = merge_snapshots(&once, &incoming);
        assert_eq!(once, twice);
        assert!(report.is_noop());
    }

    #[test]
    fn merge_never_loses_ids() {
        let canonical = Snapshot {
            users: vec![record(json!({"id": "u1", "timestamp": 1}))],
            goals: vec![record(json!({"id": "g1"}))],
            ..Snapshot::default()
        };
        let incoming = Snapshot {
            users: vec![record(json!({"id": "u2", "timestamp": 1}))],
            tree: vec![record(json!({"id": 9}))],
            ..Snapshot::default()
        };

        let (merged, _) = merge_snapshots(&canonical, &incoming);
        for source in [&canonical, &incoming] {
            for kind in CollectionKind::ALL {
                for item in source.collection(kind) {
                    let id = item.id().unwrap();
                    assert!(merged.find(kind, &id).is_some(), "{kind} lost {id}");
                }
            }
        }
    }

    #[test]
    fn disjoint_clients_converge_in_either_order() {
        let shared = record(json!({"id": "u1", "timestamp": 1, "name": "Ana"}));
        let canonical = Snapshot {
            users: vec![shared.clone()],
            ..Snapshot::default()
        };
        let client_a = Snapshot {
            users: vec![shared.clone()],
            posts: vec![record(json!({"id": "pa", "timestamp": 1, "content": "from a"}))],
            messages: vec![record(json!({"id": "ma", "timestamp": 2, "text": "hi"}))],
            ..Snapshot::default()
        };
        let client_b = Snapshot {
            users: vec![shared],
            posts: vec![record(json!({"id": "pb", "timestamp": 3, "content": "from b"}))],
            goals: vec![record(json!({"id": "gb", "timestamp": 4, "title": "roof"}))],
            ..Snapshot::default()
        };

        let (after_a, _) = merge_snapshots(&canonical, &client_a);
        let (a_then_b, _) = merge_snapshots(&after_a, &client_b);

        let (after_b, _) = merge_snapshots(&canonical, &client_b);
        let (b_then_a, _) = merge_snapshots(&after_b, &client_a);

        assert_eq!(as_sets(&a_then_b), as_sets(&b_then_a));
        assert_eq!(a_then_b.record_count(), 5);
        assert_eq!(a_then_b.users, canonical.users);
    }

    #[test]
    fn duplicate_incoming_ids_resolve_by_timestamp() {
        let incoming = posts(&[
            json!({"id": 1, "timestamp": 5, "v": "first"}),
            json!({"id": 1, "timestamp": 9, "v": "second"}),
            json!({"id": 1, "timestamp": 7, "v": "third"}),
        ]);
        let (merged, report) = merge_snapshots(&Snapshot::default(), &incoming);
        assert_eq!(merged.posts.len(), 1);
        assert_eq!(merged.posts[0].get_str("v"), Some("second"));
        assert_eq!(
            report,
            MergeReport {
                inserted: 1,
                replaced: 1,
                stale: 1,
                skipped: 0
            }
        );
    }
}
