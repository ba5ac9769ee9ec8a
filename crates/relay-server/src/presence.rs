//! Who is online.
//!
//! One entry per joined connection, keyed by connection id. The registry is
//! the only authority on presence; it is never rebuilt from stored messages.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relay_core::events::Profile;
use relay_core::ids::ConnectionId;

struct Participant {
    profile: Profile,
    /// Join sequence, used to give snapshots a stable order.
    joined: u64,
}

/// Concurrent map from connection id to participant profile.
#[derive(Default)]
pub struct PresenceRegistry {
    participants: DashMap<ConnectionId, Participant>,
    next_seq: AtomicU64,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the profile for a connection.
    /// Returns `true` if the connection was not registered before.
    /// A re-join keeps the connection's original position in snapshots.
    pub fn register(&self, id: ConnectionId, profile: Profile) -> bool {
        match self.participants.entry(id) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().profile = profile;
                false
            }
            Entry::Vacant(entry) => {
                let joined = self.next_seq.fetch_add(1, Ordering::Relaxed);
                entry.insert(Participant { profile, joined });
                true
            }
        }
    }

    /// Remove a connection, returning the profile it joined with.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Profile> {
        self.participants.remove(id).map(|(_, p)| p.profile)
    }

    /// All registered profiles in join order.
    pub fn snapshot(&self) -> Vec<Profile> {
        let mut entries: Vec<(u64, Profile)> = self
            .participants
            .iter()
            .map(|entry| (entry.joined, entry.profile.clone()))
            .collect();
        entries.sort_by_key(|(joined, _)| *joined);
        entries.into_iter().map(|(_, profile)| profile).collect()
    }

    pub fn count(&self) -> usize {
        self.participants.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn profile(name: &str) -> Profile {
        Profile(json!({ "name": name }))
    }

    #[test]
    fn register_and_count() {
        let presence = PresenceRegistry::new();
        assert_eq!(presence.count(), 0);

        assert!(presence.register(ConnectionId::new(), profile("A")));
        assert!(presence.register(ConnectionId::new(), profile("B")));
        assert_eq!(presence.count(), 2);
    }

    #[test]
    fn register_overwrites_without_growing() {
        let presence = PresenceRegistry::new();
        let id = ConnectionId::new();
        assert!(presence.register(id.clone(), profile("A")));
        assert!(!presence.register(id.clone(), profile("A2")));
        assert_eq!(presence.count(), 1);
        assert_eq!(presence.snapshot(), vec![profile("A2")]);
    }

    #[test]
    fn unregister_returns_profile_once() {
        let presence = PresenceRegistry::new();
        let id = ConnectionId::new();
        presence.register(id.clone(), profile("A"));

        assert_eq!(presence.unregister(&id), Some(profile("A")));
        assert_eq!(presence.unregister(&id), None);
        assert_eq!(presence.count(), 0);
    }

    #[test]
    fn register_then_unregister_restores_count() {
        let presence = PresenceRegistry::new();
        presence.register(ConnectionId::new(), profile("A"));
        let before = presence.count();

        let id = ConnectionId::new();
        presence.register(id.clone(), profile("B"));
        presence.unregister(&id);
        assert_eq!(presence.count(), before);
    }

    #[test]
    fn unregister_unknown_is_none() {
        let presence = PresenceRegistry::new();
        assert!(presence.unregister(&ConnectionId::new()).is_none());
    }

    #[test]
    fn snapshot_is_in_join_order() {
        let presence = PresenceRegistry::new();
        let a = ConnectionId::new();
        presence.register(a.clone(), profile("A"));
        presence.register(ConnectionId::new(), profile("B"));
        presence.register(ConnectionId::new(), profile("C"));
        // Re-join keeps A first.
        presence.register(a, profile("A"));

        assert_eq!(presence.snapshot(), vec![profile("A"), profile("B"), profile("C")]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_joins_and_leaves() {
        let presence = Arc::new(PresenceRegistry::new());
        let mut handles = Vec::new();
        for i in 0..64 {
            let presence = Arc::clone(&presence);
            handles.push(tokio::spawn(async move {
                let id = ConnectionId::new();
                presence.register(id.clone(), profile(&format!("user{i}")));
                if i % 2 == 0 {
                    presence.unregister(&id);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(presence.count(), 32);
        assert_eq!(presence.snapshot().len(), 32);
    }
}
