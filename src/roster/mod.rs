//! Persistence collaborator for the class roster.
//!
//! The hub records which devices connected under which nickname and role,
//! keyed by course. The store is write-only from the session layer's point
//! of view; reads belong to whatever application embeds the crate.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::session::Role;

/// Records device -> nickname/role/connection mappings keyed by course.
pub trait RosterStore: Send + Sync {
    fn upsert(
        &self,
        device_name: &str,
        nickname: &str,
        role: Role,
        course: &str,
        connected: bool,
        timestamp: DateTime<Utc>,
    );

    /// Marks every device of `course` disconnected except the named ones.
    fn mark_disconnected_except(&self, active_devices: &[String], course: &str);
}

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub nickname: String,
    pub role: Role,
    pub connected: bool,
    pub last_seen: DateTime<Utc>,
}

/// In-memory roster, suitable for tests and single-process hosts.
#[derive(Default)]
pub struct MemoryRoster {
    // keyed by (course, device_name)
    entries: Mutex<HashMap<(String, String), RosterEntry>>,
}

impl MemoryRoster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries_for(&self, course: &str) -> Vec<(String, RosterEntry)> {
        let entries = self.entries.lock().expect("roster lock poisoned");
        entries
            .iter()
            .filter(|((c, _), _)| c == course)
            .map(|((_, device), entry)| (device.clone(), entry.clone()))
            .collect()
    }
}

impl RosterStore for MemoryRoster {
    fn upsert(
        &self,
        device_name: &str,
        nickname: &str,
        role: Role,
        course: &str,
        connected: bool,
        timestamp: DateTime<Utc>,
    ) {
        let mut entries = self.entries.lock().expect("roster lock poisoned");
        entries.insert(
            (course.to_string(), device_name.to_string()),
            RosterEntry {
                nickname: nickname.to_string(),
                role,
                connected,
                last_seen: timestamp,
            },
        );
    }

    fn mark_disconnected_except(&self, active_devices: &[String], course: &str) {
        let mut entries = self.entries.lock().expect("roster lock poisoned");
        for ((c, device), entry) in entries.iter_mut() {
            if c == course && !active_devices.iter().any(|d| d == device) {
                entry.connected = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_mark_disconnected() {
        let roster = MemoryRoster::new();
        let now = Utc::now();
        roster.upsert("ipad-1", "Ana", Role::Student, "Biology", true, now);
        roster.upsert("ipad-2", "Ben", Role::Student, "Biology", true, now);
        roster.upsert("ipad-3", "Cara", Role::Student, "History", true, now);

        roster.mark_disconnected_except(&["ipad-1".to_string()], "Biology");

        let entries: HashMap<_, _> = roster.entries_for("Biology").into_iter().collect();
        assert!(entries["ipad-1"].connected);
        assert!(!entries["ipad-2"].connected);

        // Other courses are untouched
        let history: HashMap<_, _> = roster.entries_for("History").into_iter().collect();
        assert!(history["ipad-3"].connected);
    }

    #[test]
    fn test_upsert_overwrites() {
        let roster = MemoryRoster::new();
        let now = Utc::now();
        roster.upsert("ipad-1", "Ana", Role::Student, "Biology", true, now);
        roster.upsert("ipad-1", "Ana", Role::Student, "Biology", false, now);

        let entries = roster.entries_for("Biology");
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].1.connected);
    }
}
