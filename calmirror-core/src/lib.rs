//! Core of calmirror: keeps a destination calendar in step with an iCalendar feed.
//!
//! One reconciliation pass goes:
//! - [`feed`] fetches the feed, [`ics`] parses it and [`recurrence`] expands
//!   recurring events inside the pass [`window`]
//! - [`destination`] reads the destination calendar through the `Destination` trait
//! - [`normalize`] maps both sides to canonical records with identity keys
//! - [`diff`] computes adds, updates and deletes
//! - [`apply`] performs them with pacing and retry
//!
//! [`reconcile`] wires one pass together and [`scheduler`] runs passes on a
//! quick and a daily cadence behind a single-flight guard.

pub mod activity;
pub mod apply;
pub mod config;
pub mod destination;
pub mod diff;
pub mod error;
pub mod event;
pub mod feed;
pub mod ics;
pub mod normalize;
pub mod reconcile;
pub mod recurrence;
pub mod scheduler;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use activity::{ActivityLog, LogEntry, LogLevel, LogSink};
pub use config::{Config, IdentityStrategy};
pub use destination::{
    Destination, DestinationEvent, DestinationStatus, DestinationTime, EventBody, EventPage,
};
pub use error::{SyncError, SyncResult};
pub use feed::{FeedSource, HttpFeed};
pub use reconcile::{PassKind, PassSummary, Reconciler};
pub use scheduler::{PassReport, Scheduler, SchedulerStatus};
pub use window::SyncWindow;
