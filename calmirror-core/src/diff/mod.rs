//! Diff types for one-way reconciliation.

mod diff_kind;
mod event_diff;
mod sync_diff;

pub use diff_kind::DiffKind;
pub use event_diff::EventDiff;
pub use sync_diff::SyncDiff;
