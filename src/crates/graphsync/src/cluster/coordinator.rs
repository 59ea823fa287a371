//! Cluster coordinator service
//!
//! Owns the registry row, the two channels and the mirrored ownership map,
//! and runs the heartbeat, discovery and inbound-broadcast loops.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::cluster::broadcast::BroadcastChannel;
use crate::cluster::direct::{DirectChannel, RequestHandler};
use crate::cluster::ownership::{Owned, OwnershipMap};
use crate::cluster::registry::PeerDirectory;
use crate::cluster::wire::{ClusterPayload, Envelope, EnvelopeKind};
use crate::cluster::{ClusterResult, BROADCAST_PORT_OFFSET, DIRECT_PORT_OFFSET};
use crate::config::ClusterConfig;
use crate::db::models::ClusterNodeRow;
use crate::db::repositories::RegistryRepository;
use crate::db::DatabaseConnection;

/// Address material returned for register redirects
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerInfo {
    pub host: String,
    pub port: u16,
}

/// Cluster coordinator
///
/// One per process; shared behind an `Arc` between the session manager and
/// the server binary.
pub struct ClusterCoordinator {
    peer_id: String,
    host: String,
    http_port: u16,
    db: DatabaseConnection,
    ownership: OwnershipMap,
    broadcast: BroadcastChannel,
    direct: DirectChannel,
    directory: parking_lot::Mutex<PeerDirectory>,
    refresh_interval: Duration,
    discovery_interval: Duration,
    direct_timeout: Duration,
    inbound: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl ClusterCoordinator {
    /// Create a coordinator with a fresh peer identity
    pub fn new(config: &ClusterConfig, http_port: u16, db: DatabaseConnection) -> Arc<Self> {
        let peer_id = Uuid::new_v4().to_string();
        let (broadcast, inbound) = BroadcastChannel::new(&peer_id);
        Arc::new(Self {
            ownership: OwnershipMap::new(&peer_id),
            direct: DirectChannel::new(&peer_id),
            broadcast,
            peer_id,
            host: config.host.clone(),
            http_port,
            db,
            directory: parking_lot::Mutex::new(PeerDirectory::new()),
            refresh_interval: Duration::from_secs(config.refresh_interval_secs),
            discovery_interval: Duration::from_secs(config.discovery_interval_secs),
            direct_timeout: Duration::from_secs(config.direct_timeout_secs),
            inbound: parking_lot::Mutex::new(Some(inbound)),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// This process's cluster identity
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Advertised HTTP address of this process
    pub fn self_info(&self) -> PeerInfo {
        PeerInfo {
            host: self.host.clone(),
            port: self.http_port,
        }
    }

    /// Register in the shared registry, bind sockets, start loops
    pub async fn start(self: &Arc<Self>, handler: RequestHandler) -> ClusterResult<()> {
        let row = ClusterNodeRow::online(&self.peer_id, &self.host, self.http_port);
        RegistryRepository::register(self.db.pool(), &row).await?;

        self.broadcast
            .start_publisher(&self.host, self.http_port + BROADCAST_PORT_OFFSET)
            .await?;
        self.direct
            .start_endpoint(&self.host, self.http_port + DIRECT_PORT_OFFSET, handler)
            .await?;

        let mut tasks = self.tasks.lock();
        tasks.push(self.spawn_heartbeat());
        tasks.push(self.spawn_discovery());
        tasks.push(self.spawn_inbound());

        tracing::info!(
            "Cluster coordinator {} up at {}:{} (pub +{}, direct +{})",
            self.peer_id,
            self.host,
            self.http_port,
            BROADCAST_PORT_OFFSET,
            DIRECT_PORT_OFFSET
        );
        Ok(())
    }

    fn spawn_heartbeat(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.refresh_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = RegistryRepository::refresh(this.db.pool(), &this.peer_id).await {
                    tracing::warn!("Registry heartbeat failed: {}", e);
                }
            }
        })
    }

    fn spawn_discovery(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.discovery_interval);
            loop {
                ticker.tick().await;
                this.discover_once().await;
            }
        })
    }

    /// One discovery sweep: link new peers, tear down vanished ones
    pub async fn discover_once(self: &Arc<Self>) {
        let staleness = chrono::Duration::seconds(2 * self.refresh_interval.as_secs() as i64);
        let listing =
            match RegistryRepository::list_online(self.db.pool(), &self.peer_id, staleness).await {
                Ok(listing) => listing,
                Err(e) => {
                    tracing::warn!("Peer discovery failed: {}", e);
                    return;
                }
            };

        let diff = self.directory.lock().reconcile(&listing);

        for peer in &diff.appeared {
            tracing::info!("Peer appeared: {} at {}:{}", peer.peer_id, peer.host, peer.port);
            self.broadcast
                .subscribe(&peer.peer_id, &peer.host, peer.port + BROADCAST_PORT_OFFSET);
            if let Err(e) = self
                .direct
                .connect(&peer.peer_id, &peer.host, peer.port + DIRECT_PORT_OFFSET)
                .await
            {
                tracing::warn!("Direct link to {} failed: {}", peer.peer_id, e);
            }
        }

        for peer in &diff.vanished {
            tracing::info!("Peer disconnected: {}", peer.peer_id);
            self.broadcast.unsubscribe(&peer.peer_id);
            self.direct.disconnect(&peer.peer_id);
            let pruned = self.ownership.prune_peer(&peer.peer_id);
            if !pruned.is_empty() {
                tracing::info!(
                    "Pruned {} stale ownership entries of {}",
                    pruned.len(),
                    peer.peer_id
                );
            }
        }
    }

    fn spawn_inbound(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let rx = self.inbound.lock().take();
        tokio::spawn(async move {
            // second start() is a no-op here: the receiver is gone
            let Some(mut rx) = rx else { return };
            while let Some(envelope) = rx.recv().await {
                this.handle_broadcast(envelope);
            }
        })
    }

    pub(crate) fn handle_broadcast(&self, envelope: Envelope) {
        if envelope.kind != EnvelopeKind::Broadcast || envelope.sender_id == self.peer_id {
            return;
        }
        match envelope.cluster_payload() {
            Some(ClusterPayload::IManageInstance { instance_key }) => {
                tracing::debug!("{} manages {}", envelope.sender_id, instance_key);
                self.ownership.apply_manage(&instance_key, &envelope.sender_id);
            }
            Some(ClusterPayload::IReleaseInstance { instance_key }) => {
                tracing::debug!("{} released {}", envelope.sender_id, instance_key);
                self.ownership.apply_release(&instance_key);
            }
            None => {}
        }
    }

    /// Pure read of the ownership map
    pub fn get_owner_of(&self, instance_key: &str) -> Owned {
        self.ownership.owner_of(instance_key)
    }

    /// Claim an instance and announce it
    ///
    /// Fails with [`crate::cluster::ClusterError::AlreadyOwned`] when the
    /// map shows another owner.
    pub fn claim_ownership(&self, instance_key: &str) -> ClusterResult<()> {
        self.ownership.claim(instance_key)?;
        self.broadcast.publish(&Envelope::broadcast(
            &self.peer_id,
            ClusterPayload::IManageInstance {
                instance_key: instance_key.to_string(),
            }
            .to_value(),
        ));
        Ok(())
    }

    /// Release an instance and announce it
    pub fn release_ownership(&self, instance_key: &str) {
        self.ownership.release(instance_key);
        self.broadcast.publish(&Envelope::broadcast(
            &self.peer_id,
            ClusterPayload::IReleaseInstance {
                instance_key: instance_key.to_string(),
            }
            .to_value(),
        ));
    }

    /// Fire-and-forget broadcast of an application payload
    pub fn broadcast(&self, payload: Value) {
        self.broadcast
            .publish(&Envelope::broadcast(&self.peer_id, payload));
    }

    /// Send a direct request and await the reply
    pub async fn send_direct(
        &self,
        peer_id: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> ClusterResult<Envelope> {
        self.direct
            .request(peer_id, payload, timeout.unwrap_or(self.direct_timeout))
            .await
    }

    /// Address of a connected peer, for register redirects
    pub fn peer_info(&self, peer_id: &str) -> Option<PeerInfo> {
        self.directory.lock().get(peer_id).map(|entry| PeerInfo {
            host: entry.host.clone(),
            port: entry.port,
        })
    }

    /// Instance keys this process currently owns
    pub fn local_instances(&self) -> Vec<String> {
        self.ownership.local_instances()
    }

    /// Graceful shutdown: offline row, closed sockets, stopped loops
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.broadcast.shutdown();
        self.direct.shutdown();
        if let Err(e) =
            RegistryRepository::set_status(self.db.pool(), &self.peer_id, ClusterNodeRow::OFFLINE)
                .await
        {
            tracing::warn!("Failed to mark registry row offline: {}", e);
        }
        tracing::info!("Cluster coordinator {} stopped", self.peer_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ClusterConfig {
        ClusterConfig {
            host: "127.0.0.1".to_string(),
            refresh_interval_secs: 60,
            discovery_interval_secs: 30,
            direct_timeout_secs: 10,
        }
    }

    async fn coordinator(port: u16) -> Arc<ClusterCoordinator> {
        let db = DatabaseConnection::in_memory().await.unwrap();
        db.run_migrations().await.unwrap();
        ClusterCoordinator::new(&test_config(), port, db)
    }

    #[tokio::test]
    async fn test_claim_then_release() {
        let coord = coordinator(42200).await;
        assert_eq!(coord.get_owner_of("g1"), Owned::Nobody);

        coord.claim_ownership("g1").unwrap();
        assert_eq!(coord.get_owner_of("g1"), Owned::Local);
        assert_eq!(coord.local_instances(), vec!["g1".to_string()]);

        coord.release_ownership("g1");
        assert_eq!(coord.get_owner_of("g1"), Owned::Nobody);
    }

    #[tokio::test]
    async fn test_remote_manage_applies() {
        let coord = coordinator(42201).await;
        let remote = Envelope::broadcast(
            "peer-x",
            ClusterPayload::IManageInstance {
                instance_key: "g9".to_string(),
            }
            .to_value(),
        );
        coord.handle_broadcast(remote);
        assert_eq!(coord.get_owner_of("g9"), Owned::Peer("peer-x".to_string()));

        // claiming now must refuse
        assert!(coord.claim_ownership("g9").is_err());
    }

    #[tokio::test]
    async fn test_own_broadcast_ignored() {
        let coord = coordinator(42202).await;
        let own = Envelope::broadcast(
            coord.peer_id(),
            ClusterPayload::IManageInstance {
                instance_key: "g1".to_string(),
            }
            .to_value(),
        );
        coord.handle_broadcast(own);
        assert_eq!(coord.get_owner_of("g1"), Owned::Nobody);
    }
}
