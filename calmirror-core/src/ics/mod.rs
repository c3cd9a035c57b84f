//! Feed parsing.
//!
//! Reads iCalendar (RFC 5545) feed bodies into [`FeedEvent`](crate::event::FeedEvent)s.

mod parse;

pub use parse::parse_feed;
