//! Per-contact online/last-seen state, fed only by inbound presence events.
//! Last-write-wins; no history; independent of message flow.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shared::domain::UserId;

#[derive(Debug, Clone, PartialEq)]
pub struct PresenceRecord {
    pub is_online: bool,
    /// Meaningful only while offline.
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct PresenceTracker {
    records: HashMap<UserId, PresenceRecord>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply_update(
        &mut self,
        contact_id: UserId,
        is_online: bool,
        last_seen: Option<DateTime<Utc>>,
    ) {
        self.records.insert(
            contact_id,
            PresenceRecord {
                is_online,
                last_seen: if is_online { None } else { last_seen },
            },
        );
    }

    /// Last known record, or None when the contact was never seen.
    pub fn get(&self, contact_id: &UserId) -> Option<&PresenceRecord> {
        self.records.get(contact_id)
    }

    pub fn is_online(&self, contact_id: &UserId) -> bool {
        self.records
            .get(contact_id)
            .is_some_and(|record| record.is_online)
    }

    pub fn last_seen(&self, contact_id: &UserId) -> Option<DateTime<Utc>> {
        self.records.get(contact_id).and_then(|record| record.last_seen)
    }
}
