//! Google Calendar destination for calmirror.
//!
//! Feed UIDs are kept in a private extended property on each event, and
//! events are created with the caller's deterministic id.

mod client;
mod google_event;
mod token;
mod types;

pub use client::GoogleCalendar;
pub use token::{StaticToken, TokenFile, TokenSource};
