//! Watch registries.
//!
//! A registry is a growing set of identities whose records the session
//! wants. Adding an identity bumps a generation counter; the session reopens
//! the registry's subscription with the widened filter when it sees the
//! generation move.

use chat_core::Watcher;
use chat_types::{Filter, Kind, PublicKey};
use dashmap::DashSet;
use tokio::sync::watch;

/// What a registry's identities are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchKind {
    /// Profile records authored by the watched identities.
    Profiles,
    /// Group records addressed (`p`) to the watched group addresses.
    Groups,
}

/// Idempotent set of watched identities.
#[derive(Debug)]
pub struct WatchRegistry {
    kind: WatchKind,
    members: DashSet<PublicKey>,
    generation: watch::Sender<u64>,
}

impl WatchRegistry {
    /// Empty registry.
    pub fn new(kind: WatchKind) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            kind,
            members: DashSet::new(),
            generation,
        }
    }

    /// Registry kind.
    pub fn kind(&self) -> WatchKind {
        self.kind
    }

    /// Start watching `identity`. Returns `false` if it was already watched.
    pub fn add(&self, identity: PublicKey) -> bool {
        if !self.members.insert(identity) {
            return false;
        }
        self.generation.send_modify(|g| *g += 1);
        tracing::debug!(kind = ?self.kind, %identity, "watch registry grew");
        true
    }

    /// True if `identity` is watched.
    pub fn contains(&self, identity: &PublicKey) -> bool {
        self.members.contains(identity)
    }

    /// Watched identities, sorted.
    pub fn members(&self) -> Vec<PublicKey> {
        let mut members: Vec<PublicKey> = self.members.iter().map(|m| *m).collect();
        members.sort();
        members
    }

    /// Number of watched identities.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True when nothing is watched.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Current generation; increases by one per newly watched identity.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Receiver notified whenever the registry grows.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    /// Subscription name for this registry.
    pub fn subscription_name(&self) -> &'static str {
        match self.kind {
            WatchKind::Profiles => "watch_profiles",
            WatchKind::Groups => "watch_groups",
        }
    }

    /// Filter covering every watched identity, or `None` when empty.
    pub fn filter(&self) -> Option<Filter> {
        let members = self.members();
        if members.is_empty() {
            return None;
        }
        Some(match self.kind {
            WatchKind::Profiles => Filter::new().authors(members).kinds([Kind::Profile]),
            WatchKind::Groups => Filter::new().p_tags(members).kinds([Kind::GroupMessage]),
        })
    }
}

impl Watcher for WatchRegistry {
    fn watch(&self, identity: PublicKey) {
        self.add(identity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    #[test]
    fn add_is_idempotent() {
        let registry = WatchRegistry::new(WatchKind::Profiles);

        assert!(registry.add(key(1)));
        assert!(!registry.add(key(1)));
        assert!(registry.add(key(2)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.generation(), 2);
        assert_eq!(registry.members(), vec![key(1), key(2)]);
    }

    #[test]
    fn empty_registry_has_no_filter() {
        let registry = WatchRegistry::new(WatchKind::Groups);
        assert!(registry.filter().is_none());
    }

    #[test]
    fn filters_by_kind() {
        let profiles = WatchRegistry::new(WatchKind::Profiles);
        profiles.add(key(1));
        let filter = profiles.filter().unwrap();
        assert!(filter.authors.unwrap().contains(&key(1)));
        assert!(filter.kinds.unwrap().contains(&Kind::Profile));
        assert!(filter.p_tags.is_none());

        let groups = WatchRegistry::new(WatchKind::Groups);
        groups.add(key(2));
        let filter = groups.filter().unwrap();
        assert!(filter.p_tags.unwrap().contains(&key(2)));
        assert!(filter.kinds.unwrap().contains(&Kind::GroupMessage));
        assert!(filter.authors.is_none());
    }

    #[tokio::test]
    async fn changes_fire_on_growth() {
        let registry = WatchRegistry::new(WatchKind::Groups);
        let mut changes = registry.changes();

        registry.watch(key(3));
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), 1);

        registry.watch(key(3));
        assert!(!changes.has_changed().unwrap());
    }
}
