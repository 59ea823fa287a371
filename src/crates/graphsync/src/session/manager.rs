//! Session manager
//!
//! Owns every instance hosted on this peer: registration with ownership
//! routing, the instruction pipeline, batch create/delete, sheet
//! lifecycle, diff-based auto-save, eviction and pings. Each instance sits
//! behind its own `tokio::sync::Mutex`; that lock is the per-instance
//! critical section, so work on different instances runs in parallel while
//! work on one instance is FIFO by arrival.

use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::ws::messages::{
    ClientMessage, ConfigInstruction, GraphInstruction, ServerMessage,
};
use crate::cluster::{ClusterCoordinator, Owned};
use crate::config::SessionConfig;
use crate::db::models::{EdgeRow, HistoryRow, NodeRow};
use crate::db::repositories::{
    EdgeRepository, GraphRepository, HistoryRepository, NodeConfigRepository, NodeRepository,
};
use crate::db::DatabaseConnection;
use crate::session::diff::diff_maps;
use crate::session::error::{SessionError, SessionResult};
use crate::session::instance::{
    config_instance_key, graph_instance_key, InstanceState, ManagedInstance, CONFIG_SHEET,
};
use crate::session::user::SessionUser;
use crate::session::doc;

/// Connections whose last ping is older than this are dropped by the sweep
const STALE_PING_SECS: i64 = 90;

/// One tracked client socket
///
/// The outbound sender is the socket's write queue; dropping the
/// connection entry closes the queue, which makes the socket task shut the
/// WebSocket down.
pub struct ClientConnection {
    pub conn_id: Uuid,
    outbound: mpsc::UnboundedSender<String>,
    last_ping: AtomicI64,
    graph_binding: parking_lot::Mutex<Option<String>>,
    config_binding: parking_lot::Mutex<Option<String>>,
}

impl ClientConnection {
    fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            outbound,
            last_ping: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            graph_binding: parking_lot::Mutex::new(None),
            config_binding: parking_lot::Mutex::new(None),
        }
    }

    /// Queue a JSON value for delivery
    pub fn send_value(&self, message: &Value) {
        if let Ok(text) = serde_json::to_string(message) {
            let _ = self.outbound.send(text);
        }
    }

    /// Queue a server message for delivery
    pub fn send_message(&self, message: &ServerMessage) {
        if let Ok(text) = serde_json::to_string(message) {
            let _ = self.outbound.send(text);
        }
    }

    /// Record a ping
    pub fn touch_ping(&self) {
        self.last_ping
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Whether the socket can still be written to
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }

    /// Graph the socket is registered on, if any
    pub fn graph_binding(&self) -> Option<String> {
        self.graph_binding.lock().clone()
    }

    /// Node-config the socket is registered on, if any
    pub fn config_binding(&self) -> Option<String> {
        self.config_binding.lock().clone()
    }

    /// Whether the socket registered on anything yet
    pub fn is_bound(&self) -> bool {
        self.graph_binding().is_some() || self.config_binding().is_some()
    }

    fn ping_age_secs(&self) -> i64 {
        (chrono::Utc::now().timestamp_millis() - self.last_ping.load(Ordering::Relaxed)) / 1000
    }
}

type SharedInstance = Arc<Mutex<ManagedInstance>>;

/// Session manager service
pub struct SessionManager {
    db: DatabaseConnection,
    cluster: Arc<ClusterCoordinator>,
    config: SessionConfig,
    instances: DashMap<String, SharedInstance>,
    connections: DashMap<Uuid, Arc<ClientConnection>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

impl SessionManager {
    /// Create the manager
    pub fn new(
        db: DatabaseConnection,
        cluster: Arc<ClusterCoordinator>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            cluster,
            config,
            instances: DashMap::new(),
            connections: DashMap::new(),
            tasks: parking_lot::Mutex::new(Vec::new()),
        })
    }

    /// Spawn the auto-save flusher and the eviction sweep
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(this.config.autosave_interval_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.autosave_tick().await;
            }
        }));

        let this = Arc::clone(self);
        tasks.push(tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(std::time::Duration::from_secs(this.config.sweep_interval_secs));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                this.eviction_tick().await;
            }
        }));
    }

    // ---- connections ------------------------------------------------------

    /// Track a new socket; the receiver feeds the socket write loop
    pub fn connect(&self) -> (Arc<ClientConnection>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(ClientConnection::new(tx));
        self.connections.insert(conn.conn_id, Arc::clone(&conn));
        tracing::debug!("Connection {} tracked", conn.conn_id);
        (conn, rx)
    }

    /// Untrack a closed socket and unbind it everywhere
    pub async fn disconnect(&self, conn_id: Uuid) {
        self.connections.remove(&conn_id);
        let bound: Vec<(String, SharedInstance)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (instance_key, shared) in bound {
            let mut instance = shared.lock().await;
            let removed = instance.retain_connections(|u| u.conn_id != conn_id);
            if removed.is_empty() {
                continue;
            }
            for user in &removed {
                self.announce_departure(&instance, &user.user_id);
            }
            if instance.is_empty() {
                drop(instance);
                self.evict(&instance_key, &shared).await;
            }
        }
    }

    /// Handle `__ping__`
    ///
    /// Pings on an unbound socket are a protocol violation.
    pub fn ping(&self, conn: &ClientConnection) -> SessionResult<ServerMessage> {
        if !conn.is_bound() {
            return Err(SessionError::NotRegistered);
        }
        conn.touch_ping();
        Ok(ServerMessage::Pong)
    }

    // ---- registration -----------------------------------------------------

    /// Register a user on a graph instance
    ///
    /// Returns the catch-up tail (`time > from_timestamp`) for the sheet.
    pub async fn register_graph(
        &self,
        conn: &ClientConnection,
        graph_key: &str,
        sheet_id: &str,
        user_id: &str,
        user_name: &str,
        from_timestamp: i64,
    ) -> SessionResult<Vec<Value>> {
        let instance_key = graph_instance_key(graph_key);
        let shared = self.acquire_instance(&instance_key, graph_key, true).await?;

        let mut instance = shared.lock().await;
        instance.add_user(SessionUser::new(conn.conn_id, user_id, user_name, sheet_id));
        *conn.graph_binding.lock() = Some(graph_key.to_string());
        conn.touch_ping();

        tracing::info!(
            "User {} registered on graph {} sheet {}",
            user_id,
            graph_key,
            sheet_id
        );
        Ok(instance.catch_up(sheet_id, from_timestamp))
    }

    /// Register a user on a node-config instance
    pub async fn register_config(
        &self,
        conn: &ClientConnection,
        config_key: &str,
        user_id: &str,
        user_name: &str,
        from_timestamp: i64,
    ) -> SessionResult<Vec<Value>> {
        let instance_key = config_instance_key(config_key);
        let shared = self.acquire_instance(&instance_key, config_key, false).await?;

        let mut instance = shared.lock().await;
        instance.add_user(SessionUser::new(
            conn.conn_id,
            user_id,
            user_name,
            CONFIG_SHEET,
        ));
        *conn.config_binding.lock() = Some(config_key.to_string());
        conn.touch_ping();

        tracing::info!("User {} registered on node-config {}", user_id, config_key);
        Ok(instance.catch_up(CONFIG_SHEET, from_timestamp))
    }

    /// Resolve an instance: redirect, reuse, or load-and-claim
    async fn acquire_instance(
        &self,
        instance_key: &str,
        raw_key: &str,
        is_graph: bool,
    ) -> SessionResult<SharedInstance> {
        match self.cluster.get_owner_of(instance_key) {
            Owned::Peer(peer_id) => {
                if let Some(info) = self.cluster.peer_info(&peer_id) {
                    return Err(SessionError::OwnedElsewhere {
                        instance_key: instance_key.to_string(),
                        peer_id,
                        host: info.host,
                        port: info.port,
                    });
                }
                // owner vanished from the directory; fall through and claim
            }
            Owned::Local => {
                if let Some(shared) = self.instances.get(instance_key) {
                    return Ok(Arc::clone(&shared));
                }
                // map says local but nothing loaded; reload below
            }
            Owned::Nobody => {}
        }

        let instance = if is_graph {
            self.load_graph_instance(raw_key).await?
        } else {
            self.load_config_instance(raw_key).await?
        };

        self.cluster.claim_ownership(instance_key)?;
        let shared = self
            .instances
            .entry(instance_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(instance)))
            .clone();

        // integrity cleanup at load forces an immediate flush
        {
            let mut guard = shared.lock().await;
            if guard.dirty {
                if let Err(e) = self.flush_locked(&mut guard).await {
                    tracing::warn!("Post-load flush of {} failed: {}", instance_key, e);
                }
            }
        }

        Ok(shared)
    }

    async fn load_graph_instance(&self, graph_key: &str) -> SessionResult<ManagedInstance> {
        let pool = self.db.pool();
        let row = GraphRepository::get(pool, graph_key)
            .await?
            .ok_or_else(|| SessionError::not_found(format!("graph {}", graph_key)))?;
        let nodes = NodeRepository::list_by_graph(pool, graph_key).await?;
        let edges = EdgeRepository::list_by_graph(pool, graph_key).await?;

        let (instance, dropped) = ManagedInstance::load_graph(&row, &nodes, &edges)?;
        if dropped > 0 {
            tracing::warn!("Graph {} loaded with {} dangling edges dropped", graph_key, dropped);
        } else {
            tracing::info!(
                "Graph {} loaded: {} nodes, {} edges",
                graph_key,
                nodes.len(),
                edges.len()
            );
        }
        Ok(instance)
    }

    async fn load_config_instance(&self, config_key: &str) -> SessionResult<ManagedInstance> {
        let row = NodeConfigRepository::get(self.db.pool(), config_key)
            .await?
            .ok_or_else(|| SessionError::not_found(format!("node-config {}", config_key)))?;
        let instance = ManagedInstance::load_config(&row)?;
        tracing::info!("Node-config {} loaded", config_key);
        Ok(instance)
    }

    // ---- disconnect -------------------------------------------------------

    /// Clean unbind from a graph instance
    pub async fn disconnect_graph(
        &self,
        conn: &ClientConnection,
        graph_key: &str,
        user_id: &str,
    ) -> SessionResult<()> {
        let instance_key = graph_instance_key(graph_key);
        *conn.graph_binding.lock() = None;
        self.remove_user_from(&instance_key, user_id).await
    }

    /// Clean unbind from a node-config instance
    pub async fn disconnect_config(
        &self,
        conn: &ClientConnection,
        config_key: &str,
        user_id: &str,
    ) -> SessionResult<()> {
        let instance_key = config_instance_key(config_key);
        *conn.config_binding.lock() = None;
        self.remove_user_from(&instance_key, user_id).await
    }

    async fn remove_user_from(&self, instance_key: &str, user_id: &str) -> SessionResult<()> {
        let Some(shared) = self.instances.get(instance_key).map(|e| Arc::clone(&e)) else {
            return Ok(());
        };
        let mut instance = shared.lock().await;
        if instance.remove_user(user_id) {
            self.announce_departure(&instance, user_id);
        }
        if instance.is_empty() {
            drop(instance);
            self.evict(instance_key, &shared).await;
        }
        Ok(())
    }

    /// Tell remaining users a peer left
    fn announce_departure(&self, instance: &ManagedInstance, user_id: &str) {
        let message = match &instance.state {
            InstanceState::Graph(_) => ServerMessage::DisconnectedUserOnGraph {
                graph_key: instance.key.clone(),
                user_id: user_id.to_string(),
            },
            InstanceState::Config(_) => ServerMessage::DisconnectedUserOnNodeConfig {
                node_config_key: instance.key.clone(),
                user_id: user_id.to_string(),
            },
        };
        let mut seen = HashSet::new();
        for user in &instance.users {
            if user.user_id != user_id && seen.insert(user.conn_id) {
                if let Some(conn) = self.connections.get(&user.conn_id) {
                    conn.send_message(&message);
                }
            }
        }
    }

    // ---- edits ------------------------------------------------------------

    /// Apply a graph instruction batch from a connection
    pub async fn apply_graph_instructions(
        &self,
        conn: &ClientConnection,
        mut instructions: Vec<GraphInstruction>,
    ) -> SessionResult<()> {
        if instructions.len() > self.config.max_instruction_batch {
            return Err(SessionError::BatchTooLarge {
                size: instructions.len(),
                max: self.config.max_instruction_batch,
            });
        }
        let (shared, _graph_key) = self.bound_graph(conn)?;

        let mut instance = shared.lock().await;
        let applied = instance.apply_graph_instructions(&mut instructions)?;

        let outbound = serde_json::to_value(ClientMessage::ApplyInstructionToGraph {
            request_id: None,
            instructions,
        })
        .map_err(crate::db::StoreError::from)?;

        for sheet in &applied.affected_sheets {
            instance.record_history(sheet, outbound.clone());
        }
        self.fan_out(&instance, &applied.affected_sheets, conn, &outbound);
        Ok(())
    }

    /// Apply a node-config instruction batch from a connection
    pub async fn apply_config_instructions(
        &self,
        conn: &ClientConnection,
        mut instructions: Vec<ConfigInstruction>,
    ) -> SessionResult<()> {
        if instructions.len() > self.config.max_instruction_batch {
            return Err(SessionError::BatchTooLarge {
                size: instructions.len(),
                max: self.config.max_instruction_batch,
            });
        }
        let shared = self.bound_config(conn)?;

        let mut instance = shared.lock().await;
        instance.apply_config_instructions(&mut instructions)?;

        let outbound = serde_json::to_value(ClientMessage::ApplyInstructionToNodeConfig {
            request_id: None,
            instructions,
        })
        .map_err(crate::db::StoreError::from)?;

        instance.record_history(CONFIG_SHEET, outbound.clone());
        let sheets = BTreeSet::from([CONFIG_SHEET.to_string()]);
        self.fan_out(&instance, &sheets, conn, &outbound);
        Ok(())
    }

    /// Fill ID slots for client-side preview
    pub async fn generate_unique_ids(
        &self,
        conn: &ClientConnection,
        count: usize,
    ) -> SessionResult<Vec<String>> {
        let shared = match self.bound_graph(conn) {
            Ok((shared, _)) => shared,
            Err(_) => self.bound_config(conn)?,
        };
        let mut instance = shared.lock().await;
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(instance.ids.allocate()?);
        }
        Ok(ids)
    }

    /// Atomic multi-create on the bound graph
    pub async fn batch_create(
        &self,
        conn: &ClientConnection,
        sheet_id: &str,
        nodes: Vec<Value>,
        edges: Vec<Value>,
    ) -> SessionResult<()> {
        if nodes.len() + edges.len() > self.config.max_create_batch {
            return Err(SessionError::validation(format!(
                "batch of {} elements exceeds cap of {}",
                nodes.len() + edges.len(),
                self.config.max_create_batch
            )));
        }
        let (shared, _) = self.bound_graph(conn)?;

        let mut instance = shared.lock().await;
        instance.batch_create(sheet_id, &nodes, &edges)?;

        let outbound = serde_json::to_value(ClientMessage::BatchCreateElements {
            request_id: None,
            sheet_id: sheet_id.to_string(),
            nodes,
            edges,
        })
        .map_err(crate::db::StoreError::from)?;

        instance.record_history(sheet_id, outbound.clone());
        let sheets = BTreeSet::from([sheet_id.to_string()]);
        self.fan_out(&instance, &sheets, conn, &outbound);
        Ok(())
    }

    /// Atomic multi-delete on the bound graph
    pub async fn batch_delete(
        &self,
        conn: &ClientConnection,
        sheet_id: &str,
        node_keys: Vec<String>,
        edge_keys: Vec<String>,
    ) -> SessionResult<()> {
        let (shared, _) = self.bound_graph(conn)?;

        let mut instance = shared.lock().await;
        let outcome = instance.batch_delete(sheet_id, &node_keys, &edge_keys)?;

        // sub-workflow roots cascade through the store's compound delete
        for sub_graph in &outcome.sub_graph_keys {
            if let Err(e) = GraphRepository::delete_cascade(self.db.pool(), sub_graph).await {
                tracing::warn!("Sub-workflow cascade for {} failed: {}", sub_graph, e);
            }
        }

        let outbound = serde_json::to_value(ClientMessage::BatchDeleteElements {
            request_id: None,
            sheet_id: sheet_id.to_string(),
            node_keys,
            edge_keys,
        })
        .map_err(crate::db::StoreError::from)?;

        instance.record_history(sheet_id, outbound.clone());
        let sheets = BTreeSet::from([sheet_id.to_string()]);
        self.fan_out(&instance, &sheets, conn, &outbound);
        Ok(())
    }

    // ---- sheets -----------------------------------------------------------

    /// Add a sheet to the bound graph
    pub async fn create_sheet(
        &self,
        conn: &ClientConnection,
        key: &str,
        name: &str,
    ) -> SessionResult<()> {
        let (shared, graph_key) = self.bound_graph(conn)?;
        let mut instance = shared.lock().await;
        instance.create_sheet(key, name)?;
        self.persist_sheet_list(&graph_key, &instance).await?;

        let outbound = serde_json::to_value(ClientMessage::CreateSheet {
            request_id: None,
            key: key.to_string(),
            name: name.to_string(),
        })
        .map_err(crate::db::StoreError::from)?;
        self.record_graph_wide(&mut instance, &outbound);
        self.broadcast_to_instance(&instance, &outbound);
        Ok(())
    }

    /// Rename a sheet of the bound graph
    pub async fn rename_sheet(
        &self,
        conn: &ClientConnection,
        key: &str,
        name: &str,
    ) -> SessionResult<()> {
        let (shared, graph_key) = self.bound_graph(conn)?;
        let mut instance = shared.lock().await;
        instance.rename_sheet(key, name)?;
        self.persist_sheet_list(&graph_key, &instance).await?;

        let outbound = serde_json::to_value(ClientMessage::RenameSheet {
            request_id: None,
            key: key.to_string(),
            name: name.to_string(),
        })
        .map_err(crate::db::StoreError::from)?;
        self.record_graph_wide(&mut instance, &outbound);
        self.broadcast_to_instance(&instance, &outbound);
        Ok(())
    }

    /// Delete a sheet of the bound graph, synchronously removing its rows
    pub async fn delete_sheet(&self, conn: &ClientConnection, key: &str) -> SessionResult<()> {
        let (shared, graph_key) = self.bound_graph(conn)?;
        let mut instance = shared.lock().await;
        instance.delete_sheet(key)?;

        let pool = self.db.pool();
        EdgeRepository::remove_by_sheet(pool, &graph_key, key).await?;
        NodeRepository::remove_by_sheet(pool, &graph_key, key).await?;
        self.persist_sheet_list(&graph_key, &instance).await?;

        let outbound = serde_json::to_value(ClientMessage::DeleteSheet {
            request_id: None,
            key: key.to_string(),
        })
        .map_err(crate::db::StoreError::from)?;
        self.record_graph_wide(&mut instance, &outbound);
        self.broadcast_to_instance(&instance, &outbound);
        Ok(())
    }

    async fn persist_sheet_list(
        &self,
        graph_key: &str,
        instance: &ManagedInstance,
    ) -> SessionResult<()> {
        if let InstanceState::Graph(state) = &instance.state {
            let sheet_list = serde_json::to_string(&state.sheet_list)
                .map_err(crate::db::StoreError::from)?;
            GraphRepository::update_sheet_list(self.db.pool(), graph_key, &sheet_list).await?;
        }
        Ok(())
    }

    /// Record a graph-level event in every remaining sheet's history
    fn record_graph_wide(&self, instance: &mut ManagedInstance, message: &Value) {
        let sheets: Vec<String> = match &instance.state {
            InstanceState::Graph(state) => state.sheet_list.keys().cloned().collect(),
            InstanceState::Config(_) => vec![CONFIG_SHEET.to_string()],
        };
        for sheet in sheets {
            instance.record_history(&sheet, message.clone());
        }
    }

    // ---- save control -----------------------------------------------------

    /// Synchronous flush of the bound instance
    pub async fn force_save(&self, conn: &ClientConnection) -> SessionResult<()> {
        let shared = match self.bound_graph(conn) {
            Ok((shared, _)) => shared,
            Err(_) => self.bound_config(conn)?,
        };
        let mut instance = shared.lock().await;
        self.flush_locked(&mut instance).await
    }

    /// Flip the periodic flusher for the bound instance
    pub async fn toggle_auto_save(
        &self,
        conn: &ClientConnection,
        enabled: bool,
    ) -> SessionResult<()> {
        let shared = match self.bound_graph(conn) {
            Ok((shared, _)) => shared,
            Err(_) => self.bound_config(conn)?,
        };
        let mut instance = shared.lock().await;
        instance.auto_save = enabled;
        tracing::info!(
            "Auto-save {} for {}",
            if enabled { "enabled" } else { "disabled" },
            instance.key
        );
        Ok(())
    }

    // ---- binding lookups --------------------------------------------------

    fn bound_graph(&self, conn: &ClientConnection) -> SessionResult<(SharedInstance, String)> {
        let graph_key = conn.graph_binding().ok_or(SessionError::NotRegistered)?;
        let instance_key = graph_instance_key(&graph_key);
        let shared = self
            .instances
            .get(&instance_key)
            .map(|e| Arc::clone(&e))
            .ok_or(SessionError::NotRegistered)?;
        Ok((shared, graph_key))
    }

    fn bound_config(&self, conn: &ClientConnection) -> SessionResult<SharedInstance> {
        let config_key = conn.config_binding().ok_or(SessionError::NotRegistered)?;
        let instance_key = config_instance_key(&config_key);
        self.instances
            .get(&instance_key)
            .map(|e| Arc::clone(&e))
            .ok_or(SessionError::NotRegistered)
    }

    // ---- fan-out ----------------------------------------------------------

    /// Forward a message to every other user of the affected sheets,
    /// deduplicated by userId
    fn fan_out(
        &self,
        instance: &ManagedInstance,
        affected_sheets: &BTreeSet<String>,
        sender: &ClientConnection,
        message: &Value,
    ) {
        let sender_user: Option<String> = instance
            .users
            .iter()
            .find(|u| u.conn_id == sender.conn_id)
            .map(|u| u.user_id.clone());

        let mut seen: HashSet<&str> = HashSet::new();
        for user in &instance.users {
            if !affected_sheets.contains(&user.sheet_id) {
                continue;
            }
            if Some(&user.user_id) == sender_user.as_ref() {
                continue;
            }
            if !seen.insert(&user.user_id) {
                continue;
            }
            if let Some(conn) = self.connections.get(&user.conn_id) {
                conn.send_value(message);
            }
        }
    }

    /// Send a message to every connected socket of the instance
    fn broadcast_to_instance(&self, instance: &ManagedInstance, message: &Value) {
        let mut seen = HashSet::new();
        for user in &instance.users {
            if seen.insert(user.conn_id) {
                if let Some(conn) = self.connections.get(&user.conn_id) {
                    conn.send_value(message);
                }
            }
        }
    }

    // ---- flush ------------------------------------------------------------

    /// Diff-flush one instance (caller holds the lock)
    ///
    /// Writes the minimum create/replace/remove set, appends the queued
    /// undo batch, replaces the snapshot and broadcasts `saveStatus`.
    async fn flush_locked(&self, instance: &mut ManagedInstance) -> SessionResult<()> {
        let pool = self.db.pool();
        let key = instance.key.clone();

        match &mut instance.state {
            InstanceState::Graph(state) => {
                let node_diff = diff_maps(&state.nodes, &state.original_nodes, None);
                let edge_diff = diff_maps(&state.edges, &state.original_edges, None);

                for local_key in &node_diff.created {
                    let document = &state.nodes[local_key];
                    let sheet = doc::doc_sheet(document).unwrap_or_default();
                    let row = NodeRow::from_doc(&key, local_key, sheet, document)?;
                    NodeRepository::create(pool, &row).await?;
                }
                for local_key in &node_diff.updated {
                    let document = &state.nodes[local_key];
                    let sheet = doc::doc_sheet(document).unwrap_or_default();
                    let row = NodeRow::from_doc(&key, local_key, sheet, document)?;
                    NodeRepository::replace(pool, &row).await?;
                }
                for local_key in &node_diff.deleted {
                    NodeRepository::remove(pool, &key, local_key).await?;
                }

                for local_key in &edge_diff.created {
                    if let Some(row) = edge_row(&key, local_key, &state.edges[local_key]) {
                        EdgeRepository::create(pool, &row).await?;
                    }
                }
                for local_key in &edge_diff.updated {
                    if let Some(row) = edge_row(&key, local_key, &state.edges[local_key]) {
                        EdgeRepository::replace(pool, &row).await?;
                    }
                }
                for local_key in &edge_diff.deleted {
                    EdgeRepository::remove(pool, &key, local_key).await?;
                }

                if !node_diff.is_empty() || !edge_diff.is_empty() {
                    tracing::debug!(
                        "Flushed graph {}: {} node ops, {} edge ops",
                        key,
                        node_diff.len(),
                        edge_diff.len()
                    );
                }

                state.original_nodes = state.nodes.clone();
                state.original_edges = state.edges.clone();
                GraphRepository::touch_updated(pool, &key).await?;
            }
            InstanceState::Config(state) => {
                if state.content != state.original {
                    let document = serde_json::to_string(&state.content)
                        .map_err(crate::db::StoreError::from)?;
                    NodeConfigRepository::replace_doc(pool, &key, &document).await?;
                    state.original = state.content.clone();
                }
            }
        }

        if let Some(entries) = instance.drain_undo_queue() {
            let row = HistoryRow::new(&key, entries);
            HistoryRepository::append(pool, &row).await?;
        }

        instance.dirty = false;
        instance.dirty_sheets.clear();
        instance.last_save_time = chrono::Utc::now().timestamp_millis();

        let status = serde_json::to_value(ServerMessage::SaveStatus {
            last_save_time: instance.last_save_time,
            has_unsaved_changes: false,
            auto_save_enabled: instance.auto_save,
        })
        .map_err(crate::db::StoreError::from)?;
        self.broadcast_to_instance(instance, &status);

        Ok(())
    }

    /// One auto-save pass over every dirty instance
    pub async fn autosave_tick(&self) {
        let snapshot: Vec<(String, SharedInstance)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (instance_key, shared) in snapshot {
            let mut instance = shared.lock().await;
            if !instance.dirty || !instance.auto_save {
                continue;
            }
            if let Err(e) = self.flush_locked(&mut instance).await {
                // keep in-memory state; next tick retries
                tracing::warn!("Auto-save of {} failed: {}", instance_key, e);
            }
        }
    }

    // ---- eviction ---------------------------------------------------------

    /// One eviction pass: drop dead users, evict empty instances
    pub async fn eviction_tick(&self) {
        // stale-ping sweep: dropping the entry closes the socket
        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|e| !e.value().is_open() || e.value().ping_age_secs() > STALE_PING_SECS)
            .map(|e| *e.key())
            .collect();
        for conn_id in stale {
            tracing::debug!("Dropping stale connection {}", conn_id);
            self.connections.remove(&conn_id);
        }

        let snapshot: Vec<(String, SharedInstance)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (instance_key, shared) in snapshot {
            let mut instance = shared.lock().await;
            let removed = instance.retain_connections(|u| {
                self.connections
                    .get(&u.conn_id)
                    .map(|c| c.is_open())
                    .unwrap_or(false)
            });
            for user in &removed {
                self.announce_departure(&instance, &user.user_id);
            }
            if instance.is_empty() {
                drop(instance);
                self.evict(&instance_key, &shared).await;
            }
        }
    }

    /// Force-flush, drop from memory, release ownership
    ///
    /// Flush comes first: ownership is only given up once the data is
    /// durably written. A failed flush keeps the instance for the next
    /// sweep to retry.
    async fn evict(&self, instance_key: &str, shared: &SharedInstance) {
        let mut instance = shared.lock().await;
        if instance.dirty {
            if let Err(e) = self.flush_locked(&mut instance).await {
                tracing::warn!(
                    "Eviction flush of {} failed, keeping instance: {}",
                    instance_key,
                    e
                );
                return;
            }
        }
        drop(instance);

        self.instances.remove(instance_key);
        self.cluster.release_ownership(instance_key);
        tracing::info!("Instance {} evicted", instance_key);
    }

    // ---- shutdown ---------------------------------------------------------

    /// Stop timers, flush everything, release all ownership
    pub async fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let snapshot: Vec<(String, SharedInstance)> = self
            .instances
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();

        for (instance_key, shared) in snapshot {
            let mut instance = shared.lock().await;
            if instance.dirty {
                if let Err(e) = self.flush_locked(&mut instance).await {
                    tracing::error!("Shutdown flush of {} failed: {}", instance_key, e);
                }
            }
            drop(instance);
            self.instances.remove(&instance_key);
            self.cluster.release_ownership(&instance_key);
        }
        self.connections.clear();
        tracing::info!("Session manager stopped");
    }

    /// Number of loaded instances (diagnostics)
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    /// Number of tracked connections (diagnostics)
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

/// Build an edge row, skipping documents with corrupt endpoints
fn edge_row(graph_key: &str, local_key: &str, document: &Value) -> Option<EdgeRow> {
    let sheet = doc::doc_sheet(document)?;
    let source = doc::edge_source(document)?;
    let target = doc::edge_target(document)?;
    EdgeRow::from_doc(graph_key, local_key, sheet, source, target, document).ok()
}
