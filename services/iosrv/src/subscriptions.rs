//! Observer bookkeeping.
//!
//! Tracks which external observers are connected and which devices they
//! watch. Pure in-memory set operations; the scheduler reads the
//! aggregates once per tick to decide whether to poll at all.

use std::collections::HashSet;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// What an observer subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    /// Every device (wildcard)
    All,
    /// One specific device
    Device(i64),
}

/// Concurrent registry of observer connections and their subscriptions
#[derive(Default)]
pub struct SubscriptionTracker {
    /// Connected observer ids
    connections: DashMap<String, ()>,
    /// Subscriptions per observer
    subscriptions: DashMap<String, HashSet<Subscription>>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer connection
    pub fn add_connection(&self, observer_id: &str) {
        self.connections.insert(observer_id.to_string(), ());
    }

    /// Remove an observer connection and everything it subscribed to
    pub fn remove_connection(&self, observer_id: &str) {
        self.connections.remove(observer_id);
        self.remove_all_subscriptions(observer_id);
    }

    /// Subscribe an observer to a device or to all devices
    pub fn add_subscription(&self, observer_id: &str, subscription: Subscription) {
        self.subscriptions
            .entry(observer_id.to_string())
            .or_default()
            .insert(subscription);
    }

    /// Drop one subscription of an observer
    pub fn remove_subscription(&self, observer_id: &str, subscription: Subscription) {
        if let Some(mut subs) = self.subscriptions.get_mut(observer_id) {
            subs.remove(&subscription);
            if subs.is_empty() {
                drop(subs);
                self.subscriptions.remove(observer_id);
            }
        }
    }

    /// Drop everything an observer subscribed to (observer disconnect)
    pub fn remove_all_subscriptions(&self, observer_id: &str) {
        self.subscriptions.remove(observer_id);
    }

    /// Whether any observer connection exists
    pub fn has_active_connections(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Whether any subscription exists at all
    pub fn has_active_subscriptions(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    /// Whether some observer holds the wildcard subscription
    pub fn has_wildcard(&self) -> bool {
        self.subscriptions
            .iter()
            .any(|entry| entry.value().contains(&Subscription::All))
    }

    /// Distinct device ids with at least one specific subscription.
    ///
    /// The wildcard is not expanded here; callers check
    /// [`Self::has_wildcard`] separately.
    pub fn subscribed_device_ids(&self) -> HashSet<i64> {
        let mut ids = HashSet::new();
        for entry in self.subscriptions.iter() {
            for sub in entry.value() {
                if let Subscription::Device(id) = sub {
                    ids.insert(*id);
                }
            }
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_follow_subscription_lifecycle() {
        let tracker = SubscriptionTracker::new();
        assert!(!tracker.has_active_connections());
        assert!(!tracker.has_active_subscriptions());

        tracker.add_connection("ui-1");
        assert!(tracker.has_active_connections());
        assert!(!tracker.has_active_subscriptions());

        tracker.add_subscription("ui-1", Subscription::Device(7));
        assert!(tracker.has_active_subscriptions());
        assert!(!tracker.has_wildcard());
        assert_eq!(tracker.subscribed_device_ids(), HashSet::from([7]));

        tracker.remove_subscription("ui-1", Subscription::Device(7));
        assert!(!tracker.has_active_subscriptions());
    }

    #[test]
    fn wildcard_is_distinct_from_device_ids() {
        let tracker = SubscriptionTracker::new();
        tracker.add_connection("ui-1");
        tracker.add_subscription("ui-1", Subscription::All);

        assert!(tracker.has_wildcard());
        assert!(tracker.has_active_subscriptions());
        // The wildcard never leaks into the concrete id set.
        assert!(tracker.subscribed_device_ids().is_empty());
    }

    #[test]
    fn disconnect_drops_all_subscriptions() {
        let tracker = SubscriptionTracker::new();
        tracker.add_connection("ui-1");
        tracker.add_subscription("ui-1", Subscription::Device(1));
        tracker.add_subscription("ui-1", Subscription::Device(2));
        tracker.add_connection("ui-2");
        tracker.add_subscription("ui-2", Subscription::Device(2));

        tracker.remove_connection("ui-1");
        assert!(tracker.has_active_connections());
        assert_eq!(tracker.subscribed_device_ids(), HashSet::from([2]));

        tracker.remove_connection("ui-2");
        assert!(!tracker.has_active_connections());
        assert!(!tracker.has_active_subscriptions());
    }
}
