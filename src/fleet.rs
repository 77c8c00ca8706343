//! Fleet membership tracking
//!
//! Process-wide set of router names the daemon has already seen, used by the
//! short-period delta tick to avoid re-backing-up the entire fleet every 15
//! seconds. Membership only ever grows: a router that disappears from every
//! source is kept so it is never re-announced as "new" (decommission
//! detection is an open product question, recorded in DESIGN.md).

use crate::records::DeviceRecord;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

pub struct FleetTracker {
    known: Mutex<HashSet<String>>,
}

pub type SharedFleetTracker = Arc<FleetTracker>;

impl FleetTracker {
    pub fn new() -> Self {
        Self {
            known: Mutex::new(HashSet::new()),
        }
    }

    /// Names present in `resolved` but not yet in membership.
    pub fn diff(&self, resolved: &[DeviceRecord]) -> HashSet<String> {
        let known = self.known.lock();
        resolved
            .iter()
            .filter(|r| !known.contains(&r.name))
            .map(|r| r.name.clone())
            .collect()
    }

    /// Union `names` into membership. Idempotent.
    pub fn commit<I>(&self, names: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut known = self.known.lock();
        known.extend(names);
    }

    /// Union a single name; used after each successful sweep backup.
    pub fn observe(&self, name: &str) {
        let mut known = self.known.lock();
        if known.insert(name.to_string()) {
            tracing::debug!("router {} now tracked", name);
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.known.lock().contains(name)
    }

    pub fn len(&self) -> usize {
        self.known.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.lock().is_empty()
    }
}

impl Default for FleetTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> DeviceRecord {
        DeviceRecord {
            name: name.into(),
            host: "h".into(),
            port: 22,
            user: "u".into(),
            password: "p".into(),
        }
    }

    #[test]
    fn test_diff_returns_only_unknown_names() {
        let tracker = FleetTracker::new();
        tracker.commit(["r1".to_string()]);

        let fresh = tracker.diff(&[record("r1"), record("r2")]);
        assert!(!fresh.contains("r1"));
        assert!(fresh.contains("r2"));
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let tracker = FleetTracker::new();
        tracker.commit(["r1".to_string(), "r2".to_string()]);
        tracker.commit(["r1".to_string(), "r2".to_string()]);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_membership_starts_empty() {
        let tracker = FleetTracker::new();
        assert!(tracker.is_empty());
        let fresh = tracker.diff(&[record("r1")]);
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn test_observe_unions_single_name() {
        let tracker = FleetTracker::new();
        tracker.observe("r1");
        tracker.observe("r1");
        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains("r1"));
    }
}
