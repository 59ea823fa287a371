//! Direct channel (request/response, identity-aware)
//!
//! The endpoint accepts one persistent connection per remote peer and
//! answers `direct` envelopes on the same socket. Outbound, the channel
//! holds one link per discovered peer; [`DirectChannel::request`] parks a
//! correlation slot, writes the envelope and suspends the caller until the
//! matching `response` arrives or the timeout elapses.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::cluster::wire::{Envelope, EnvelopeKind};
use crate::cluster::{ClusterError, ClusterResult};

/// Handler invoked for every inbound direct request
///
/// Returning `Some(value)` sends a `response` envelope back to the caller;
/// `None` leaves the request unanswered (the caller times out).
pub type RequestHandler = Arc<dyn Fn(&Envelope) -> Option<Value> + Send + Sync>;

/// Per-process direct channel
pub struct DirectChannel {
    peer_id: String,
    /// Outbound write queues, one per connected peer
    links: DashMap<String, mpsc::UnboundedSender<String>>,
    /// Correlation slots awaiting a response
    pending: Arc<DashMap<String, oneshot::Sender<Envelope>>>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
    link_tasks: DashMap<String, JoinHandle<()>>,
}

impl DirectChannel {
    /// Create the channel
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            links: DashMap::new(),
            pending: Arc::new(DashMap::new()),
            accept_task: parking_lot::Mutex::new(None),
            link_tasks: DashMap::new(),
        }
    }

    /// Bind the endpoint and start answering requests
    pub async fn start_endpoint(
        &self,
        host: &str,
        port: u16,
        handler: RequestHandler,
    ) -> ClusterResult<()> {
        let listener = TcpListener::bind((host, port)).await?;
        tracing::info!("Direct endpoint listening on {}:{}", host, port);

        let local = self.peer_id.clone();
        let task = tokio::spawn(async move {
            loop {
                let (stream, addr) = match listener.accept().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!("Direct accept failed: {}", e);
                        continue;
                    }
                };
                tracing::debug!("Direct link accepted from {}", addr);

                let handler = Arc::clone(&handler);
                let local = local.clone();
                tokio::spawn(async move {
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        let request = match Envelope::from_line(&line) {
                            Ok(envelope) => envelope,
                            Err(e) => {
                                tracing::warn!("Bad direct envelope: {}", e);
                                continue;
                            }
                        };
                        if request.kind != EnvelopeKind::Direct {
                            continue;
                        }
                        if let Some(payload) = handler(&request) {
                            let reply = Envelope::response(&local, &request, payload);
                            match reply.to_line() {
                                Ok(line) => {
                                    if write_half.write_all(line.as_bytes()).await.is_err()
                                        || write_half.write_all(b"\n").await.is_err()
                                    {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("Unserializable direct reply: {}", e)
                                }
                            }
                        }
                    }
                });
            }
        });
        *self.accept_task.lock() = Some(task);

        Ok(())
    }

    /// Connect the outbound link to a peer's endpoint
    pub async fn connect(&self, peer_id: &str, host: &str, port: u16) -> ClusterResult<()> {
        if self.links.contains_key(peer_id) {
            return Ok(());
        }

        let stream = TcpStream::connect((host, port)).await?;
        let (read_half, mut write_half) = stream.into_split();

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.links.insert(peer_id.to_string(), tx);

        // writer: drain the queue onto the socket
        let writer_peer = peer_id.to_string();
        let writer = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                if write_half.write_all(line.as_bytes()).await.is_err()
                    || write_half.write_all(b"\n").await.is_err()
                {
                    tracing::debug!("Direct link to {} closed (write)", writer_peer);
                    break;
                }
            }
        });

        // reader: complete pending correlation slots from responses
        let pending = Arc::clone(&self.pending);
        let reader_peer = peer_id.to_string();
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let envelope = match Envelope::from_line(&line) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::warn!("Bad response from {}: {}", reader_peer, e);
                        continue;
                    }
                };
                if envelope.kind != EnvelopeKind::Response {
                    continue;
                }
                let Some(response_id) = envelope.response_id.clone() else {
                    continue;
                };
                if let Some((_, slot)) = pending.remove(&response_id) {
                    let _ = slot.send(envelope);
                }
            }
        });

        self.link_tasks.insert(format!("{}:w", peer_id), writer);
        self.link_tasks.insert(format!("{}:r", peer_id), reader);

        Ok(())
    }

    /// Drop the link to a peer
    pub fn disconnect(&self, peer_id: &str) {
        self.links.remove(peer_id);
        for suffix in [":w", ":r"] {
            if let Some((_, task)) = self.link_tasks.remove(&format!("{}{}", peer_id, suffix)) {
                task.abort();
            }
        }
    }

    /// Whether a link to the peer exists
    pub fn is_connected(&self, peer_id: &str) -> bool {
        self.links.contains_key(peer_id)
    }

    /// Send a request and await the correlated response
    pub async fn request(
        &self,
        peer_id: &str,
        payload: Value,
        timeout: Duration,
    ) -> ClusterResult<Envelope> {
        let link = self
            .links
            .get(peer_id)
            .ok_or_else(|| ClusterError::UnknownPeer(peer_id.to_string()))?
            .clone();

        let envelope = Envelope::direct(&self.peer_id, peer_id, payload);
        let correlation_id = envelope.id.clone();

        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.clone(), tx);

        if link.send(envelope.to_line()?).is_err() {
            self.pending.remove(&correlation_id);
            return Err(ClusterError::UnknownPeer(peer_id.to_string()));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            // responder dropped or timeout: free the slot either way
            _ => {
                self.pending.remove(&correlation_id);
                Err(ClusterError::Timeout {
                    peer_id: peer_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Abort every task owned by the channel
    pub fn shutdown(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
        for entry in self.link_tasks.iter() {
            entry.value().abort();
        }
        self.link_tasks.clear();
        self.links.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_request_response() {
        let server = DirectChannel::new("peer-b");
        let handler: RequestHandler =
            Arc::new(|req| Some(json!({"echo": req.payload.clone(), "ok": true})));
        server
            .start_endpoint("127.0.0.1", 42120, handler)
            .await
            .unwrap();

        let client = DirectChannel::new("peer-a");
        client.connect("peer-b", "127.0.0.1", 42120).await.unwrap();

        let response = client
            .request("peer-b", json!({"ask": 1}), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(response.sender_id, "peer-b");
        assert_eq!(response.payload["ok"], true);
        assert_eq!(response.payload["echo"]["ask"], 1);

        client.shutdown();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_unknown_peer() {
        let client = DirectChannel::new("peer-a");
        let err = client
            .request("ghost", json!({}), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ClusterError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_timeout_releases_slot() {
        let server = DirectChannel::new("peer-b");
        // handler never answers
        let handler: RequestHandler = Arc::new(|_| None);
        server
            .start_endpoint("127.0.0.1", 42121, handler)
            .await
            .unwrap();

        let client = DirectChannel::new("peer-a");
        client.connect("peer-b", "127.0.0.1", 42121).await.unwrap();

        let err = client
            .request("peer-b", json!({}), Duration::from_millis(150))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(client.pending.is_empty());

        client.shutdown();
        server.shutdown();
    }
}
