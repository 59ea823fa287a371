//! In-memory managed instances
//!
//! A [`ManagedInstance`] is the unit of ownership: one graph or one
//! node-config, loaded on exactly one peer while users are connected. It
//! owns its maps, snapshots, per-sheet instruction history, undo queue and
//! user list; the manager only holds `instanceKey → instance` and timer
//! state. All mutation happens under the per-instance critical section the
//! manager wraps around it.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde_json::{json, Value};

use graphedit_core::{
    apply, assign_fresh_identifiers, find_identifier_path, inverse, validate, EditOp, IdAllocator,
};

use crate::api::ws::messages::{ConfigInstruction, GraphInstruction};
use crate::db::models::{EdgeRow, GraphRow, NodeConfigRow, NodeRow};
use crate::session::doc;
use crate::session::error::{SessionError, SessionResult};
use crate::session::user::SessionUser;

/// Pseudo-sheet key for node-config history
pub const CONFIG_SHEET: &str = "0";

/// Instance-key namespace for graphs
pub fn graph_instance_key(graph_key: &str) -> String {
    format!("graph:{}", graph_key)
}

/// Instance-key namespace for node-configs
pub fn config_instance_key(config_key: &str) -> String {
    format!("config:{}", config_key)
}

/// One entry of a sheet's instruction history
///
/// Times are strictly non-decreasing per sheet; catch-up is a binary
/// search by time.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    /// Server arrival time (Unix millis)
    pub time: i64,
    /// The broadcastable message (correlation id stripped)
    pub message: Value,
}

/// One queued undo/redo record, flushed into `graph_history` in batches
#[derive(Debug, Clone)]
pub struct UndoRecord {
    pub time: i64,
    pub sheet_id: String,
    /// Operation class: "instruction", "create", "delete" or "sheetDelete"
    pub kind: &'static str,
    pub payload: Value,
}

impl UndoRecord {
    fn to_value(&self) -> Value {
        json!({
            "time": self.time,
            "sheetId": self.sheet_id,
            "kind": self.kind,
            "payload": self.payload,
        })
    }
}

/// Graph-shaped instance state
#[derive(Debug, Default)]
pub struct GraphState {
    /// localKey → node document
    pub nodes: HashMap<String, Value>,
    /// localKey → edge document
    pub edges: HashMap<String, Value>,
    /// `source-{id}` / `target-{id}` → edge localKeys touching that node
    pub edge_index: HashMap<String, HashSet<String>>,
    /// Last-persisted node documents
    pub original_nodes: HashMap<String, Value>,
    /// Last-persisted edge documents
    pub original_edges: HashMap<String, Value>,
    /// sheetId → display name
    pub sheet_list: BTreeMap<String, String>,
    /// Graph refuses additional sheets
    pub no_multiple_sheet: bool,
}

fn source_slot(node_key: &str) -> String {
    format!("source-{}", node_key)
}

fn target_slot(node_key: &str) -> String {
    format!("target-{}", node_key)
}

impl GraphState {
    /// Insert an edge and index both endpoints
    pub fn insert_edge(&mut self, local_key: &str, edge: Value) {
        if let Some(source) = doc::edge_source(&edge) {
            self.edge_index
                .entry(source_slot(source))
                .or_default()
                .insert(local_key.to_string());
        }
        if let Some(target) = doc::edge_target(&edge) {
            self.edge_index
                .entry(target_slot(target))
                .or_default()
                .insert(local_key.to_string());
        }
        self.edges.insert(local_key.to_string(), edge);
    }

    /// Remove an edge, clearing both index slots
    pub fn remove_edge(&mut self, local_key: &str) -> Option<Value> {
        let edge = self.edges.remove(local_key)?;
        for slot in [
            doc::edge_source(&edge).map(source_slot),
            doc::edge_target(&edge).map(target_slot),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(bucket) = self.edge_index.get_mut(&slot) {
                bucket.remove(local_key);
                if bucket.is_empty() {
                    self.edge_index.remove(&slot);
                }
            }
        }
        Some(edge)
    }

    /// Replace an edge document, re-indexing if the endpoints moved
    pub fn replace_edge(&mut self, local_key: &str, edge: Value) {
        self.remove_edge(local_key);
        self.insert_edge(local_key, edge);
    }

    /// Every edge touching a node, as localKeys (O(degree))
    pub fn edges_touching(&self, node_key: &str) -> Vec<String> {
        let mut keys = BTreeSet::new();
        for slot in [source_slot(node_key), target_slot(node_key)] {
            if let Some(bucket) = self.edge_index.get(&slot) {
                keys.extend(bucket.iter().cloned());
            }
        }
        keys.into_iter().collect()
    }
}

/// Node-config-shaped instance state: one content tree
#[derive(Debug)]
pub struct ConfigState {
    pub content: Value,
    pub original: Value,
}

/// The two instance shapes
#[derive(Debug)]
pub enum InstanceState {
    Graph(GraphState),
    Config(ConfigState),
}

/// Result of applying a graph instruction batch
#[derive(Debug, Default)]
pub struct AppliedBatch {
    /// Sheets whose state changed (history and fan-out targets)
    pub affected_sheets: BTreeSet<String>,
}

/// Result of a batch delete
#[derive(Debug, Default)]
pub struct DeleteOutcome {
    /// Edges removed because an endpoint node was deleted
    pub cascaded_edge_keys: Vec<String>,
    /// Sub-workflow graphs to cascade-remove from the store
    pub sub_graph_keys: Vec<String>,
}

/// Result of a sheet deletion
#[derive(Debug, Default)]
pub struct SheetDeleteOutcome {
    pub removed_node_keys: Vec<String>,
    pub removed_edge_keys: Vec<String>,
}

/// One live instance
#[derive(Debug)]
pub struct ManagedInstance {
    /// The underlying graph or config key (not namespaced)
    pub key: String,
    pub state: InstanceState,
    /// Registrations, one per (user, sheet)
    pub users: Vec<SessionUser>,
    /// Per-sheet instruction history, non-decreasing in time
    pub history: HashMap<String, Vec<HistoryEntry>>,
    /// Undo/redo records queued since the last flush
    pub undo_queue: Vec<UndoRecord>,
    /// Sheets changed since the last flush
    pub dirty_sheets: HashSet<String>,
    pub dirty: bool,
    pub auto_save: bool,
    /// Graph-unique identifier allocator
    pub ids: IdAllocator,
    /// Unix millis of the last successful flush
    pub last_save_time: i64,
}

impl ManagedInstance {
    fn new(key: &str, state: InstanceState, ids: IdAllocator) -> Self {
        Self {
            key: key.to_string(),
            state,
            users: Vec::new(),
            history: HashMap::new(),
            undo_queue: Vec::new(),
            dirty_sheets: HashSet::new(),
            dirty: false,
            auto_save: true,
            ids,
            last_save_time: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Build a graph instance from store rows
    ///
    /// Edges whose source or target node is missing are dropped from the
    /// live maps but kept in the snapshot, so the next flush purges them
    /// from the store; the instance comes back marked dirty in that case.
    /// Returns the instance and the number of dropped edges.
    pub fn load_graph(
        graph: &GraphRow,
        node_rows: &[NodeRow],
        edge_rows: &[EdgeRow],
    ) -> SessionResult<(Self, usize)> {
        let mut state = GraphState {
            sheet_list: graph.sheets()?,
            no_multiple_sheet: graph.no_multiple_sheet,
            ..GraphState::default()
        };
        let mut ids = IdAllocator::new();

        for row in node_rows {
            let document = row.document()?;
            ids.observe(&row.local_key);
            ids.observe_document(&document);
            state.nodes.insert(row.local_key.clone(), document);
        }

        let mut dropped = 0usize;
        let mut dropped_sheets = Vec::new();
        for row in edge_rows {
            let document = row.document()?;
            ids.observe(&row.local_key);
            ids.observe_document(&document);

            let endpoints_ok = doc::edge_source(&document)
                .map(|s| state.nodes.contains_key(s))
                .unwrap_or(false)
                && doc::edge_target(&document)
                    .map(|t| state.nodes.contains_key(t))
                    .unwrap_or(false);

            // snapshot keeps the row either way; a dropped edge must show
            // up as deleted in the next diff
            state
                .original_edges
                .insert(row.local_key.clone(), document.clone());

            if endpoints_ok {
                state.insert_edge(&row.local_key, document);
            } else {
                tracing::warn!(
                    "Dropping edge {} of graph {}: missing endpoint",
                    row.local_key,
                    graph.key
                );
                dropped += 1;
                dropped_sheets.push(row.sheet_id.clone());
            }
        }

        state.original_nodes = state.nodes.clone();

        let mut instance = Self::new(&graph.key, InstanceState::Graph(state), ids);
        if dropped > 0 {
            for sheet in dropped_sheets {
                instance.mark_dirty(&sheet);
            }
        }
        Ok((instance, dropped))
    }

    /// Build a node-config instance from its store row
    pub fn load_config(row: &NodeConfigRow) -> SessionResult<Self> {
        let content = row.document()?;
        let mut ids = IdAllocator::new();
        ids.observe_document(&content);
        Ok(Self::new(
            &row.key,
            InstanceState::Config(ConfigState {
                original: content.clone(),
                content,
            }),
            ids,
        ))
    }

    fn graph_state(&self) -> SessionResult<&GraphState> {
        match &self.state {
            InstanceState::Graph(state) => Ok(state),
            InstanceState::Config(_) => Err(SessionError::validation(
                "operation targets a graph but the instance is a node-config",
            )),
        }
    }

    fn graph_state_mut(&mut self) -> SessionResult<&mut GraphState> {
        match &mut self.state {
            InstanceState::Graph(state) => Ok(state),
            InstanceState::Config(_) => Err(SessionError::validation(
                "operation targets a graph but the instance is a node-config",
            )),
        }
    }

    // ---- users ------------------------------------------------------------

    /// Register a (user, sheet) entry, replacing a stale duplicate
    pub fn add_user(&mut self, user: SessionUser) {
        self.users
            .retain(|u| !(u.user_id == user.user_id && u.sheet_id == user.sheet_id));
        self.users.push(user);
    }

    /// Remove every entry of a user; returns true when any was removed
    pub fn remove_user(&mut self, user_id: &str) -> bool {
        let before = self.users.len();
        self.users.retain(|u| u.user_id != user_id);
        self.users.len() != before
    }

    /// Drop registrations whose connection is gone
    pub fn retain_connections<F: Fn(&SessionUser) -> bool>(&mut self, alive: F) -> Vec<SessionUser> {
        let mut removed = Vec::new();
        self.users.retain(|u| {
            if alive(u) {
                true
            } else {
                removed.push(u.clone());
                false
            }
        });
        removed
    }

    /// Whether no users remain
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    // ---- history ----------------------------------------------------------

    /// Append a message to a sheet's history, keeping times non-decreasing
    pub fn record_history(&mut self, sheet_id: &str, message: Value) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let entries = self.history.entry(sheet_id.to_string()).or_default();
        let time = entries.last().map(|e| e.time.max(now)).unwrap_or(now);
        entries.push(HistoryEntry { time, message });
        time
    }

    /// Messages with `time > from_timestamp`, oldest first
    pub fn catch_up(&self, sheet_id: &str, from_timestamp: i64) -> Vec<Value> {
        let Some(entries) = self.history.get(sheet_id) else {
            return Vec::new();
        };
        let start = entries.partition_point(|e| e.time <= from_timestamp);
        entries[start..].iter().map(|e| e.message.clone()).collect()
    }

    /// Mark a sheet (and the instance) dirty
    pub fn mark_dirty(&mut self, sheet_id: &str) {
        self.dirty_sheets.insert(sheet_id.to_string());
        self.dirty = true;
    }

    /// Drain the undo queue into one serializable batch
    pub fn drain_undo_queue(&mut self) -> Option<String> {
        if self.undo_queue.is_empty() {
            return None;
        }
        let entries: Vec<Value> = self.undo_queue.drain(..).map(|r| r.to_value()).collect();
        serde_json::to_string(&entries).ok()
    }

    // ---- instruction application ------------------------------------------

    /// Apply a batch of graph instructions
    ///
    /// All-or-nothing: every instruction is validated and applied to
    /// working copies first; the maps are only touched when the whole
    /// batch succeeded. `applyUniqIdentifier` rewrites are written back
    /// into `batch`, so the fanned-out message carries the committed IDs.
    pub fn apply_graph_instructions(
        &mut self,
        batch: &mut [GraphInstruction],
    ) -> SessionResult<AppliedBatch> {
        self.graph_state()?;

        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        enum Target {
            Node,
            Edge,
        }

        let mut working: HashMap<(Target, String), Value> = HashMap::new();
        let mut undo_entries: Vec<Value> = Vec::new();
        let mut result = AppliedBatch::default();

        for instruction in batch.iter_mut() {
            let (target, id) = match (&instruction.node_id, &instruction.edge_id) {
                (Some(id), None) => (Target::Node, id.clone()),
                (None, Some(id)) => (Target::Edge, id.clone()),
                _ => {
                    return Err(SessionError::validation(
                        "instruction must target exactly one of nodeId or edgeId",
                    ))
                }
            };

            validate(&instruction.i)?;
            if doc::touches_reserved_field(instruction.i.path()) {
                return Err(SessionError::validation(format!(
                    "instruction path {} rewrites a reserved field",
                    instruction.i.path()
                )));
            }

            let entry = working.entry((target, id.clone()));
            let current = match entry {
                std::collections::hash_map::Entry::Occupied(slot) => slot.into_mut(),
                std::collections::hash_map::Entry::Vacant(slot) => {
                    let state = match &self.state {
                        InstanceState::Graph(state) => state,
                        InstanceState::Config(_) => unreachable!(),
                    };
                    let source = match target {
                        Target::Node => state.nodes.get(&id),
                        Target::Edge => state.edges.get(&id),
                    };
                    let document = source.ok_or_else(|| {
                        SessionError::not_found(format!(
                            "{} {} on sheet {}",
                            if target == Target::Node { "node" } else { "edge" },
                            id,
                            instruction.sheet_id
                        ))
                    })?;
                    if doc::doc_sheet(document) != Some(instruction.sheet_id.as_str()) {
                        return Err(SessionError::not_found(format!(
                            "target {} is not on sheet {}",
                            id, instruction.sheet_id
                        )));
                    }
                    slot.insert(document.clone())
                }
            };

            // server-side identity for inserted subtrees
            if instruction.apply_uniq_identifier {
                match &mut instruction.i {
                    EditOp::Set { value, .. } | EditOp::InsertArray { value, .. } => {
                        assign_fresh_identifiers(value, &mut self.ids)?;
                    }
                    _ => {}
                }
            }

            if let Some(targeted) = &instruction.targeted_identifier {
                check_targeted(current, targeted, instruction.i.path())?;
            }

            let undo = inverse(current, &instruction.i)?;
            let applied = apply(current, &instruction.i, None)?;
            *current = applied;

            undo_entries.push(json!({
                "sheetId": instruction.sheet_id,
                "target": if target == Target::Node { "node" } else { "edge" },
                "id": id,
                "op": instruction.i,
                "inverse": undo,
            }));
            result.affected_sheets.insert(instruction.sheet_id.clone());
        }

        // commit
        let state = self.graph_state_mut()?;
        for ((target, id), document) in working {
            match target {
                Target::Node => {
                    state.nodes.insert(id, document);
                }
                Target::Edge => state.replace_edge(&id, document),
            }
        }
        for sheet in result.affected_sheets.clone() {
            let entries: Vec<&Value> = undo_entries
                .iter()
                .filter(|e| e["sheetId"] == sheet.as_str())
                .collect();
            self.undo_queue.push(UndoRecord {
                time: chrono::Utc::now().timestamp_millis(),
                sheet_id: sheet.clone(),
                kind: "instruction",
                payload: json!(entries),
            });
            self.mark_dirty(&sheet);
        }

        Ok(result)
    }

    /// Apply a batch of node-config instructions to the content tree
    pub fn apply_config_instructions(
        &mut self,
        batch: &mut [ConfigInstruction],
    ) -> SessionResult<()> {
        let content = match &self.state {
            InstanceState::Config(state) => &state.content,
            InstanceState::Graph(_) => {
                return Err(SessionError::validation(
                    "operation targets a node-config but the instance is a graph",
                ))
            }
        };

        let mut working = content.clone();
        let mut undo_entries: Vec<Value> = Vec::new();

        for instruction in batch.iter_mut() {
            validate(&instruction.i)?;

            if instruction.apply_uniq_identifier {
                match &mut instruction.i {
                    EditOp::Set { value, .. } | EditOp::InsertArray { value, .. } => {
                        assign_fresh_identifiers(value, &mut self.ids)?;
                    }
                    _ => {}
                }
            }

            if let Some(targeted) = &instruction.targeted_identifier {
                check_targeted(&working, targeted, instruction.i.path())?;
            }

            let undo = inverse(&working, &instruction.i)?;
            working = apply(&working, &instruction.i, None)?;
            undo_entries.push(json!({"op": instruction.i, "inverse": undo}));
        }

        if let InstanceState::Config(state) = &mut self.state {
            state.content = working;
        }
        self.mark_dirty(CONFIG_SHEET);
        self.undo_queue.push(UndoRecord {
            time: chrono::Utc::now().timestamp_millis(),
            sheet_id: CONFIG_SHEET.to_string(),
            kind: "instruction",
            payload: json!(undo_entries),
        });

        Ok(())
    }

    // ---- batch create / delete --------------------------------------------

    /// Atomically create nodes and edges on one sheet
    ///
    /// Every key must be globally fresh (not in the maps, not in the
    /// used-ID set, not duplicated inside the batch); edges may reference
    /// nodes that arrive in the same batch.
    pub fn batch_create(
        &mut self,
        sheet_id: &str,
        nodes: &[Value],
        edges: &[Value],
    ) -> SessionResult<()> {
        let graph_key = self.key.clone();
        let state = self.graph_state()?;
        if !state.sheet_list.contains_key(sheet_id) {
            return Err(SessionError::not_found(format!("sheet {}", sheet_id)));
        }

        let mut batch_keys: HashSet<String> = HashSet::new();
        let mut node_envelopes = Vec::with_capacity(nodes.len());
        for document in nodes {
            let envelope = doc::validate_node_envelope(document, &graph_key, sheet_id)?;
            if state.nodes.contains_key(&envelope.key)
                || state.edges.contains_key(&envelope.key)
                || self.ids.is_used(&envelope.key)
                || !batch_keys.insert(envelope.key.clone())
            {
                return Err(SessionError::Duplicate(envelope.key));
            }
            node_envelopes.push(envelope);
        }

        let mut edge_envelopes = Vec::with_capacity(edges.len());
        for document in edges {
            let envelope = doc::validate_edge_envelope(document, &graph_key, sheet_id)?;
            if state.nodes.contains_key(&envelope.key)
                || state.edges.contains_key(&envelope.key)
                || self.ids.is_used(&envelope.key)
                || !batch_keys.insert(envelope.key.clone())
            {
                return Err(SessionError::Duplicate(envelope.key));
            }
            for endpoint in [&envelope.source, &envelope.target] {
                let exists = state.nodes.contains_key(endpoint)
                    || node_envelopes.iter().any(|n| &n.key == endpoint);
                if !exists {
                    return Err(SessionError::validation(format!(
                        "edge {} references missing node {}",
                        envelope.key, endpoint
                    )));
                }
            }
            edge_envelopes.push(envelope);
        }

        // commit
        let state = self.graph_state_mut()?;
        for (envelope, document) in node_envelopes.iter().zip(nodes) {
            state.nodes.insert(envelope.key.clone(), document.clone());
        }
        for (envelope, document) in edge_envelopes.iter().zip(edges) {
            state.insert_edge(&envelope.key, document.clone());
        }
        for key in &batch_keys {
            self.ids.observe(key);
        }
        for document in nodes.iter().chain(edges) {
            self.ids.observe_document(document);
        }

        self.mark_dirty(sheet_id);
        self.undo_queue.push(UndoRecord {
            time: chrono::Utc::now().timestamp_millis(),
            sheet_id: sheet_id.to_string(),
            kind: "create",
            payload: json!({"nodes": nodes, "edges": edges}),
        });

        Ok(())
    }

    /// Atomically delete nodes and edges from one sheet
    ///
    /// Edges go first; deleting a node cascades to every edge still
    /// attached to it. Deleted keys stay in the used-ID set forever.
    pub fn batch_delete(
        &mut self,
        sheet_id: &str,
        node_keys: &[String],
        edge_keys: &[String],
    ) -> SessionResult<DeleteOutcome> {
        let state = self.graph_state()?;

        for key in node_keys {
            let document = state
                .nodes
                .get(key)
                .ok_or_else(|| SessionError::not_found(format!("node {}", key)))?;
            if doc::doc_sheet(document) != Some(sheet_id) {
                return Err(SessionError::not_found(format!(
                    "node {} on sheet {}",
                    key, sheet_id
                )));
            }
        }
        for key in edge_keys {
            let document = state
                .edges
                .get(key)
                .ok_or_else(|| SessionError::not_found(format!("edge {}", key)))?;
            if doc::doc_sheet(document) != Some(sheet_id) {
                return Err(SessionError::not_found(format!(
                    "edge {} on sheet {}",
                    key, sheet_id
                )));
            }
        }

        let mut outcome = DeleteOutcome::default();
        let mut removed_nodes: Vec<Value> = Vec::new();
        let mut removed_edges: Vec<Value> = Vec::new();
        let mut dirty: BTreeSet<String> = BTreeSet::new();
        dirty.insert(sheet_id.to_string());

        let state = self.graph_state_mut()?;
        for key in edge_keys {
            if let Some(edge) = state.remove_edge(key) {
                removed_edges.push(edge);
            }
        }
        for key in node_keys {
            for edge_key in state.edges_touching(key) {
                if let Some(edge) = state.remove_edge(&edge_key) {
                    if let Some(sheet) = doc::doc_sheet(&edge) {
                        dirty.insert(sheet.to_string());
                    }
                    removed_edges.push(edge);
                    outcome.cascaded_edge_keys.push(edge_key);
                }
            }
            if let Some(node) = state.nodes.remove(key) {
                if let Some(sub_graph) = doc::node_sub_graph_key(&node) {
                    outcome.sub_graph_keys.push(sub_graph.to_string());
                }
                removed_nodes.push(node);
            }
        }

        for sheet in dirty {
            self.mark_dirty(&sheet);
        }
        self.undo_queue.push(UndoRecord {
            time: chrono::Utc::now().timestamp_millis(),
            sheet_id: sheet_id.to_string(),
            kind: "delete",
            payload: json!({"nodes": removed_nodes, "edges": removed_edges}),
        });

        Ok(outcome)
    }

    // ---- sheets -----------------------------------------------------------

    /// Add a sheet; refused when the graph is single-sheet
    pub fn create_sheet(&mut self, key: &str, name: &str) -> SessionResult<()> {
        let state = self.graph_state_mut()?;
        if state.no_multiple_sheet {
            return Err(SessionError::SheetPolicy(
                "graph does not allow multiple sheets".to_string(),
            ));
        }
        if state.sheet_list.contains_key(key) {
            return Err(SessionError::Duplicate(format!("sheet {}", key)));
        }
        state.sheet_list.insert(key.to_string(), name.to_string());
        Ok(())
    }

    /// Rename an existing sheet
    pub fn rename_sheet(&mut self, key: &str, name: &str) -> SessionResult<()> {
        let state = self.graph_state_mut()?;
        match state.sheet_list.get_mut(key) {
            Some(display) => {
                *display = name.to_string();
                Ok(())
            }
            None => Err(SessionError::not_found(format!("sheet {}", key))),
        }
    }

    /// Delete a sheet, archiving its maps into the undo log
    ///
    /// The caller removes the corresponding store rows synchronously; the
    /// snapshot drops the entries here so the next diff does not try to
    /// delete them again.
    pub fn delete_sheet(&mut self, key: &str) -> SessionResult<SheetDeleteOutcome> {
        let state = self.graph_state_mut()?;
        if state.sheet_list.remove(key).is_none() {
            return Err(SessionError::not_found(format!("sheet {}", key)));
        }

        let node_keys: Vec<String> = state
            .nodes
            .iter()
            .filter(|(_, d)| doc::doc_sheet(d) == Some(key))
            .map(|(k, _)| k.clone())
            .collect();
        let edge_keys: Vec<String> = state
            .edges
            .iter()
            .filter(|(_, d)| doc::doc_sheet(d) == Some(key))
            .map(|(k, _)| k.clone())
            .collect();

        let mut archived_nodes = Vec::with_capacity(node_keys.len());
        let mut archived_edges = Vec::with_capacity(edge_keys.len());
        for edge_key in &edge_keys {
            if let Some(edge) = state.remove_edge(edge_key) {
                archived_edges.push(edge);
            }
            state.original_edges.remove(edge_key);
        }
        for node_key in &node_keys {
            if let Some(node) = state.nodes.remove(node_key) {
                archived_nodes.push(node);
            }
            state.original_nodes.remove(node_key);
        }

        self.undo_queue.push(UndoRecord {
            time: chrono::Utc::now().timestamp_millis(),
            sheet_id: key.to_string(),
            kind: "sheetDelete",
            payload: json!({"nodes": archived_nodes, "edges": archived_edges}),
        });
        self.history.remove(key);
        self.dirty_sheets.remove(key);

        Ok(SheetDeleteOutcome {
            removed_node_keys: node_keys,
            removed_edge_keys: edge_keys,
        })
    }
}

/// Enforce `targetedIdentifier`: the edit must land inside the subtree
/// whose `identifier` matches
fn check_targeted(document: &Value, targeted: &str, path: &str) -> SessionResult<()> {
    let prefix = find_identifier_path(document, targeted)
        .ok_or_else(|| SessionError::not_found(format!("identifier {}", targeted)))?;
    let inside =
        prefix.is_empty() || path == prefix || path.starts_with(&format!("{}.", prefix));
    if inside {
        Ok(())
    } else {
        Err(SessionError::validation(format!(
            "path {} is outside the subtree of identifier {}",
            path, targeted
        )))
    }
}
