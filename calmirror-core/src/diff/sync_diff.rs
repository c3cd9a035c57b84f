//! Set difference between the feed table and the destination table.

use std::collections::BTreeSet;

use crate::diff::EventDiff;
use crate::normalize::{CanonicalTable, DestinationTable};

/// Changes needed to make the destination match the feed for one window.
#[derive(Debug, Default)]
pub struct SyncDiff {
    /// Redundant copies first, then records missing from the feed
    pub deletes: Vec<EventDiff>,
    pub updates: Vec<EventDiff>,
    pub creates: Vec<EventDiff>,
    pub unchanged: usize,
}

impl SyncDiff {
    pub fn compute(feed: &CanonicalTable, destination: &DestinationTable) -> SyncDiff {
        let feed_keys: BTreeSet<&String> = feed.entries.keys().collect();
        let dest_keys: BTreeSet<&String> = destination.table.entries.keys().collect();

        let mut diff = SyncDiff::default();

        for dup in &destination.duplicates {
            diff.deletes.extend(EventDiff::get_diff(Some(dup.clone()), None));
        }

        for key in dest_keys.difference(&feed_keys) {
            let old = &destination.table.entries[*key];
            // Already gone; nothing to delete
            if old.is_cancelled() {
                continue;
            }
            diff.deletes.extend(EventDiff::get_diff(Some(old.clone()), None));
        }

        for key in feed_keys.intersection(&dest_keys) {
            let old = destination.table.entries[*key].clone();
            let new = feed.entries[*key].clone();
            match EventDiff::get_diff(Some(old), Some(new)) {
                Some(update) => diff.updates.push(update),
                None => diff.unchanged += 1,
            }
        }

        for key in feed_keys.difference(&dest_keys) {
            diff.creates
                .extend(EventDiff::get_diff(None, Some(feed.entries[*key].clone())));
        }

        diff
    }

    pub fn is_empty(&self) -> bool {
        self.deletes.is_empty() && self.updates.is_empty() && self.creates.is_empty()
    }

    /// (created, updated, deleted)
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.creates.len(), self.updates.len(), self.deletes.len())
    }

    /// Application order: deletes, then updates, then creates.
    pub fn in_apply_order(&self) -> impl Iterator<Item = &EventDiff> {
        self.deletes
            .iter()
            .chain(self.updates.iter())
            .chain(self.creates.iter())
    }
}
