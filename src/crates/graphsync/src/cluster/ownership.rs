//! Mirrored instance-ownership map
//!
//! Every peer keeps the same `instanceKey → peerId` table, mutated only by
//! `IManageInstance` / `IReleaseInstance` broadcasts plus the local
//! claim/release path. Entries naming the local peer read as [`Owned::Local`].

use dashmap::DashMap;

use crate::cluster::{ClusterError, ClusterResult};

/// Who owns an instance, from the local peer's point of view
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owned {
    /// This process has the instance in memory
    Local,
    /// Another peer announced ownership
    Peer(String),
    /// No owner known
    Nobody,
}

/// Per-process ownership mirror
#[derive(Debug)]
pub struct OwnershipMap {
    peer_id: String,
    entries: DashMap<String, String>,
}

impl OwnershipMap {
    /// Create an empty map for the given local identity
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            entries: DashMap::new(),
        }
    }

    /// Pure read of the map
    pub fn owner_of(&self, instance_key: &str) -> Owned {
        match self.entries.get(instance_key) {
            Some(owner) if *owner == self.peer_id => Owned::Local,
            Some(owner) => Owned::Peer(owner.clone()),
            None => Owned::Nobody,
        }
    }

    /// Record the local peer as owner
    ///
    /// Pre-condition of the claim path: refused when the map already shows
    /// another owner (the conflicting claimant defers).
    pub fn claim(&self, instance_key: &str) -> ClusterResult<()> {
        if let Some(owner) = self.entries.get(instance_key) {
            if *owner != self.peer_id {
                return Err(ClusterError::AlreadyOwned {
                    instance_key: instance_key.to_string(),
                    owner: owner.clone(),
                });
            }
        }
        self.entries
            .insert(instance_key.to_string(), self.peer_id.clone());
        Ok(())
    }

    /// Drop the local entry
    pub fn release(&self, instance_key: &str) {
        self.entries.remove(instance_key);
    }

    /// Apply a received `IManageInstance`
    pub fn apply_manage(&self, instance_key: &str, sender_id: &str) {
        self.entries
            .insert(instance_key.to_string(), sender_id.to_string());
    }

    /// Apply a received `IReleaseInstance`
    pub fn apply_release(&self, instance_key: &str) {
        self.entries.remove(instance_key);
    }

    /// Drop every entry owned by a vanished peer
    ///
    /// Returns the pruned instance keys.
    pub fn prune_peer(&self, peer_id: &str) -> Vec<String> {
        let mut pruned = Vec::new();
        self.entries.retain(|key, owner| {
            if owner == peer_id {
                pruned.push(key.clone());
                false
            } else {
                true
            }
        });
        pruned
    }

    /// Number of known entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Instance keys currently owned by the local peer
    pub fn local_instances(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| *e.value() == self.peer_id)
            .map(|e| e.key().clone())
            .collect()
    }
}
