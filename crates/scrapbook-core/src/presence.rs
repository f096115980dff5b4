//! Presence: which collaborators are currently looking at a scrapbook.
//!
//! Records are never deleted by the engine. Staleness is decided on the
//! client by comparing `last_active` against a TTL.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Liveness marker stored per `(scrapbook, user)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub user_id: String,
    /// Client clock at the last heartbeat.
    pub last_active: DateTime<Utc>,
    /// Store clock at the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    pub fn is_active(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        now - self.last_active < ttl
    }
}

/// Client-side view over the presence records of one scrapbook.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    ttl: TimeDelta,
    records: Vec<PresenceRecord>,
}

impl PresenceTracker {
    pub fn new(ttl: TimeDelta) -> Self {
        Self {
            ttl,
            records: Vec::new(),
        }
    }

    /// Replace the known records with a fresh snapshot from the store.
    pub fn replace(&mut self, records: Vec<PresenceRecord>) {
        self.records = records;
    }

    /// All known records, including stale ones.
    pub fn records(&self) -> &[PresenceRecord] {
        &self.records
    }

    /// Records refreshed within the TTL.
    pub fn active(&self, now: DateTime<Utc>) -> Vec<&PresenceRecord> {
        self.records
            .iter()
            .filter(|r| r.is_active(now, self.ttl))
            .collect()
    }

    pub fn active_user_ids(&self, now: DateTime<Utc>) -> Vec<&str> {
        self.active(now).into_iter().map(|r| r.user_id.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, last_active: DateTime<Utc>) -> PresenceRecord {
        PresenceRecord {
            user_id: user.to_string(),
            last_active,
            timestamp: None,
        }
    }

    #[test]
    fn test_ttl_filtering() {
        let now = Utc::now();
        let mut tracker = PresenceTracker::new(TimeDelta::minutes(5));
        tracker.replace(vec![
            record("fresh", now - TimeDelta::seconds(30)),
            record("edge", now - TimeDelta::minutes(5)),
            record("stale", now - TimeDelta::hours(2)),
        ]);

        assert_eq!(tracker.active_user_ids(now), vec!["fresh"]);
        // Stale records are kept, only filtered.
        assert_eq!(tracker.records().len(), 3);
    }

    #[test]
    fn test_wire_shape() {
        let at = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let value = serde_json::to_value(record("u1", at)).unwrap();
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["lastActive"], "2024-05-01T12:00:00Z");
        assert!(value.get("timestamp").is_none());
    }
}
