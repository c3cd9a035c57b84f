use std::fmt;

use crate::diff::DiffKind;
use crate::normalize::CanonicalEvent;

/// One pending change. `old` is the destination record, `new` the feed record.
#[derive(Debug, Clone)]
pub struct EventDiff {
    pub kind: DiffKind,
    pub old: Option<CanonicalEvent>,
    pub new: Option<CanonicalEvent>,
}

impl fmt::Display for EventDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.event() {
            Some(event) => write!(f, "{}: {}", self.kind, event),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl EventDiff {
    /// A cancelled destination record always needs an update to restore it.
    pub fn get_diff(
        old_event: Option<CanonicalEvent>,
        new_event: Option<CanonicalEvent>,
    ) -> Option<EventDiff> {
        match (&old_event, &new_event) {
            (None, Some(_)) => Some(EventDiff {
                kind: DiffKind::Create,
                old: None,
                new: new_event,
            }),
            (Some(_), None) => Some(EventDiff {
                kind: DiffKind::Delete,
                old: old_event,
                new: None,
            }),
            (Some(old), Some(new)) => {
                if !old.is_cancelled() && old.same_content(new) {
                    None
                } else {
                    Some(EventDiff {
                        kind: DiffKind::Update,
                        old: old_event,
                        new: new_event,
                    })
                }
            }
            (None, None) => None,
        }
    }

    /// The event (prefer new, fallback to old)
    pub fn event(&self) -> Option<&CanonicalEvent> {
        self.new.as_ref().or(self.old.as_ref())
    }

    pub fn identity_key(&self) -> &str {
        self.event().map(|e| e.identity_key.as_str()).unwrap_or_default()
    }

    /// Names of the fields that differ between old and new.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let (Some(old), Some(new)) = (&self.old, &self.new) else {
            return Vec::new();
        };

        let mut fields = Vec::new();
        if old.title != new.title {
            fields.push("title");
        }
        if old.description != new.description {
            fields.push("description");
        }
        if old.location != new.location {
            fields.push("location");
        }
        if old.start != new.start {
            fields.push("start");
        }
        if old.end != new.end {
            fields.push("end");
        }
        if old.status != new.status {
            fields.push("status");
        }
        fields
    }
}
