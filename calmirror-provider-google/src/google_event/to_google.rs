use std::collections::BTreeMap;

use calmirror_core::{DestinationStatus, DestinationTime, EventBody};

use crate::types::{EventDateTime, ExtendedProperties, FEED_UID_PROPERTY, GoogleEvent};

pub trait ToGoogle {
    fn to_google(&self) -> GoogleEvent;
}

impl ToGoogle for EventBody {
    fn to_google(&self) -> GoogleEvent {
        let status = match self.status {
            DestinationStatus::Confirmed => "confirmed",
            DestinationStatus::Cancelled => "cancelled",
        };

        let mut private = BTreeMap::new();
        private.insert(FEED_UID_PROPERTY.to_string(), self.feed_uid.clone());

        GoogleEvent {
            id: self.id.clone(),
            status: Some(status.to_string()),
            summary: Some(self.summary.clone()),
            // Send empty strings so an update clears a removed field
            description: Some(self.description.clone().unwrap_or_default()),
            location: Some(self.location.clone().unwrap_or_default()),
            start: Some(time_to_google(&self.start)),
            end: Some(time_to_google(&self.end)),
            original_start_time: None,
            ical_uid: None,
            extended_properties: Some(ExtendedProperties { private }),
        }
    }
}

fn time_to_google(time: &DestinationTime) -> EventDateTime {
    match time {
        DestinationTime::Date(d) => EventDateTime {
            date: Some(*d),
            date_time: None,
            time_zone: None,
        },
        DestinationTime::DateTime { value, time_zone } => EventDateTime {
            date: None,
            date_time: Some(*value),
            time_zone: time_zone.clone(),
        },
    }
}
