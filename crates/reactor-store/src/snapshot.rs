//! Turns successive full listings of a collection into change events.

use std::collections::{BTreeMap, BTreeSet};

use reactor_core::{ChangeEvent, ChangeKind, Record};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Version {
    created: Option<String>,
    updated: Option<String>,
}

/// Last seen create and update times per document id.
#[derive(Debug, Default)]
pub struct Snapshot {
    versions: BTreeMap<String, Version>,
}

impl Snapshot {
    /// Diff `records` (the whole collection) against the previous listing.
    ///
    /// The first call reports every document as added. A document whose
    /// create time changed was deleted and recreated between listings and is
    /// reported as added again. Removed documents are reported last, in id
    /// order, carrying only their id.
    pub fn apply(&mut self, records: Vec<Record>) -> Vec<ChangeEvent> {
        let mut seen = BTreeSet::new();
        let mut events = Vec::new();

        for record in records {
            seen.insert(record.id.clone());
            let version = Version {
                created: record.create_time.clone(),
                updated: record.update_time.clone(),
            };
            let kind = match self.versions.insert(record.id.clone(), version.clone()) {
                None => Some(ChangeKind::Added),
                Some(prev) if prev.created != version.created => Some(ChangeKind::Added),
                Some(prev) if prev.updated != version.updated => Some(ChangeKind::Modified),
                Some(_) => None,
            };
            if let Some(kind) = kind {
                events.push(ChangeEvent { kind, record });
            }
        }

        let gone: Vec<String> = self
            .versions
            .keys()
            .filter(|id| !seen.contains(*id))
            .cloned()
            .collect();
        for id in gone {
            self.versions.remove(&id);
            events.push(ChangeEvent {
                kind: ChangeKind::Removed,
                record: Record::new(id),
            });
        }

        events
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}
