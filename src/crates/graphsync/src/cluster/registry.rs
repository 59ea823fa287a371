//! Peer directory and discovery diffing
//!
//! Tracks which peers the process is currently linked to and computes the
//! connect/disconnect work of each discovery sweep against the registry
//! listing.

use std::collections::HashMap;

use crate::db::models::ClusterNodeRow;

/// Address material for one connected peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub peer_id: String,
    pub host: String,
    pub port: u16,
}

impl PeerEntry {
    fn from_row(row: &ClusterNodeRow) -> Self {
        Self {
            peer_id: row.peer_id.clone(),
            host: row.host.clone(),
            port: row.port as u16,
        }
    }
}

/// Outcome of one discovery sweep
#[derive(Debug, Default)]
pub struct DiscoveryDiff {
    /// Peers present in the registry but not yet linked
    pub appeared: Vec<PeerEntry>,
    /// Peers linked locally but gone from the registry
    pub vanished: Vec<PeerEntry>,
}

/// Connected-peer directory
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: HashMap<String, PeerEntry>,
}

impl PeerDirectory {
    /// Empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Diff the registry listing against the connected set and update it
    ///
    /// The directory afterwards mirrors the listing; the returned diff
    /// names the links to bring up and tear down.
    pub fn reconcile(&mut self, listing: &[ClusterNodeRow]) -> DiscoveryDiff {
        let mut diff = DiscoveryDiff::default();

        for row in listing {
            if !self.peers.contains_key(&row.peer_id) {
                let entry = PeerEntry::from_row(row);
                self.peers.insert(row.peer_id.clone(), entry.clone());
                diff.appeared.push(entry);
            }
        }

        let listed: std::collections::HashSet<&str> =
            listing.iter().map(|r| r.peer_id.as_str()).collect();
        let gone: Vec<String> = self
            .peers
            .keys()
            .filter(|id| !listed.contains(id.as_str()))
            .cloned()
            .collect();
        for id in gone {
            if let Some(entry) = self.peers.remove(&id) {
                diff.vanished.push(entry);
            }
        }

        diff
    }

    /// Look up a connected peer's address
    pub fn get(&self, peer_id: &str) -> Option<&PeerEntry> {
        self.peers.get(peer_id)
    }

    /// Number of connected peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peers are connected
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str) -> ClusterNodeRow {
        ClusterNodeRow::online(id, "127.0.0.1", 8080)
    }

    #[test]
    fn test_reconcile_reports_new_peers() {
        let mut dir = PeerDirectory::new();
        let diff = dir.reconcile(&[row("peer-b"), row("peer-c")]);
        assert_eq!(diff.appeared.len(), 2);
        assert!(diff.vanished.is_empty());
        assert_eq!(dir.len(), 2);
    }

    #[test]
    fn test_reconcile_is_stable() {
        let mut dir = PeerDirectory::new();
        dir.reconcile(&[row("peer-b")]);
        let diff = dir.reconcile(&[row("peer-b")]);
        assert!(diff.appeared.is_empty());
        assert!(diff.vanished.is_empty());
    }

    #[test]
    fn test_reconcile_reports_vanished_peers() {
        let mut dir = PeerDirectory::new();
        dir.reconcile(&[row("peer-b"), row("peer-c")]);
        let diff = dir.reconcile(&[row("peer-c")]);
        assert_eq!(diff.appeared.len(), 0);
        assert_eq!(diff.vanished.len(), 1);
        assert_eq!(diff.vanished[0].peer_id, "peer-b");
        assert!(dir.get("peer-b").is_none());
        assert!(dir.get("peer-c").is_some());
    }
}
