//! Broadcast channel (publish/subscribe)
//!
//! Each process runs one publisher socket that fans every published
//! envelope out to all connected subscribers, and keeps one subscriber
//! task per discovered peer feeding inbound envelopes to the coordinator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::cluster::wire::Envelope;
use crate::cluster::ClusterResult;

/// Delay before a subscriber task retries a dropped peer connection
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(3);

/// Publisher plus per-peer subscriber links
pub struct BroadcastChannel {
    peer_id: String,
    /// Write queues of subscribers connected to the local publisher
    subscribers: Arc<DashMap<u64, mpsc::UnboundedSender<String>>>,
    /// Subscriber tasks keyed by remote peer id
    links: DashMap<String, JoinHandle<()>>,
    /// Where inbound envelopes from all subscriptions are funneled
    inbound: mpsc::UnboundedSender<Envelope>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl BroadcastChannel {
    /// Create the channel; inbound envelopes surface on the paired receiver
    pub fn new(peer_id: &str) -> (Self, mpsc::UnboundedReceiver<Envelope>) {
        let (inbound, rx) = mpsc::unbounded_channel();
        (
            Self {
                peer_id: peer_id.to_string(),
                subscribers: Arc::new(DashMap::new()),
                links: DashMap::new(),
                inbound,
                accept_task: parking_lot::Mutex::new(None),
            },
            rx,
        )
    }

    /// Bind the publisher socket and start accepting subscribers
    pub async fn start_publisher(&self, host: &str, port: u16) -> ClusterResult<()> {
        let listener = TcpListener::bind((host, port)).await?;
        tracing::info!("Broadcast publisher listening on {}:{}", host, port);

        let subscribers = Arc::clone(&self.subscribers);
        let seq = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("Publisher accept failed: {}", e);
                        continue;
                    }
                };
                tracing::debug!("Subscriber connected from {}", addr);

                let id = seq.fetch_add(1, Ordering::Relaxed);
                let (tx, mut rx) = mpsc::unbounded_channel::<String>();
                subscribers.insert(id, tx);

                let subscribers = Arc::clone(&subscribers);
                tokio::spawn(async move {
                    let mut stream = stream;
                    while let Some(line) = rx.recv().await {
                        if stream.write_all(line.as_bytes()).await.is_err()
                            || stream.write_all(b"\n").await.is_err()
                        {
                            break;
                        }
                    }
                    subscribers.remove(&id);
                });
            }
        });
        *self.accept_task.lock() = Some(task);

        Ok(())
    }

    /// Publish an envelope to every connected subscriber (fire and forget)
    pub fn publish(&self, envelope: &Envelope) {
        let line = match envelope.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Dropping unserializable broadcast: {}", e);
                return;
            }
        };
        self.subscribers.retain(|_, tx| tx.send(line.clone()).is_ok());
    }

    /// Subscribe to a peer's publisher
    ///
    /// Keeps retrying the connection until [`unsubscribe`](Self::unsubscribe)
    /// tears the link down, so a bounced peer is picked back up without
    /// waiting for the next discovery sweep.
    pub fn subscribe(&self, peer_id: &str, host: &str, port: u16) {
        if self.links.contains_key(peer_id) {
            return;
        }

        let inbound = self.inbound.clone();
        let local = self.peer_id.clone();
        let peer = peer_id.to_string();
        let host = host.to_string();
        let task = tokio::spawn(async move {
            loop {
                match TcpStream::connect((host.as_str(), port)).await {
                    Ok(stream) => {
                        tracing::debug!("{} subscribed to {}", local, peer);
                        let mut lines = BufReader::new(stream).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            match Envelope::from_line(&line) {
                                Ok(envelope) => {
                                    if inbound.send(envelope).is_err() {
                                        return;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Bad envelope from {}: {}", peer, e);
                                }
                            }
                        }
                        tracing::debug!("Subscription to {} closed", peer);
                    }
                    Err(e) => {
                        tracing::debug!("Subscribe to {} failed: {}", peer, e);
                    }
                }
                tokio::time::sleep(RESUBSCRIBE_DELAY).await;
            }
        });
        self.links.insert(peer_id.to_string(), task);
    }

    /// Tear down the subscription to a peer
    pub fn unsubscribe(&self, peer_id: &str) {
        if let Some((_, task)) = self.links.remove(peer_id) {
            task.abort();
        }
    }

    /// Number of peers we are subscribed to
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of subscribers on the local publisher
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Abort every task owned by the channel
    pub fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        for entry in self.links.iter() {
            entry.value().abort();
        }
        self.links.clear();
        self.subscribers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let (publisher, _rx_a) = BroadcastChannel::new("peer-a");
        publisher.start_publisher("127.0.0.1", 42110).await.unwrap();

        let (subscriber, mut rx_b) = BroadcastChannel::new("peer-b");
        subscriber.subscribe("peer-a", "127.0.0.1", 42110);

        // wait for the link to come up, then publish
        tokio::time::sleep(Duration::from_millis(200)).await;
        publisher.publish(&Envelope::broadcast("peer-a", json!({"hello": 1})));

        let received = tokio::time::timeout(Duration::from_secs(2), rx_b.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.sender_id, "peer-a");
        assert_eq!(received.payload["hello"], 1);

        subscriber.shutdown();
        publisher.shutdown();
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let (publisher, _rx_a) = BroadcastChannel::new("peer-a");
        publisher.start_publisher("127.0.0.1", 42111).await.unwrap();

        let (subscriber, mut rx_b) = BroadcastChannel::new("peer-b");
        subscriber.subscribe("peer-a", "127.0.0.1", 42111);
        tokio::time::sleep(Duration::from_millis(200)).await;
        subscriber.unsubscribe("peer-a");
        assert_eq!(subscriber.link_count(), 0);

        publisher.publish(&Envelope::broadcast("peer-a", json!({"late": true})));
        let result = tokio::time::timeout(Duration::from_millis(300), rx_b.recv()).await;
        assert!(result.is_err() || result.unwrap().is_none());

        publisher.shutdown();
    }
}
