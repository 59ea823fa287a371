//! Client-facing WebSocket messages
//!
//! JSON messages discriminated by a `type` field. Requests may carry an
//! optional correlation id `_id`; when present, the server replies with
//! `{_id, _response: {ok, message?}, …}`. Unknown types and malformed JSON
//! close the socket.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use graphedit_core::EditOp;

/// One instruction against a graph instance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphInstruction {
    /// Sheet the target lives on
    pub sheet_id: String,

    /// Target node localKey (exactly one of nodeId/edgeId is set)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    /// Target edge localKey
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,

    /// The edit itself
    pub i: EditOp,

    /// Rewrite embedded identifiers in inserted subtrees with fresh IDs
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub apply_uniq_identifier: bool,

    /// Restrict the edit to the subtree carrying this identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeted_identifier: Option<String>,

    /// Client rendering hint, forwarded untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger_html_render: Option<bool>,

    /// Client animation hint, forwarded untouched
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animate_pos: Option<bool>,
}

/// One instruction against a node-config content tree
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInstruction {
    /// The edit itself
    pub i: EditOp,

    /// Rewrite embedded identifiers in inserted subtrees with fresh IDs
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub apply_uniq_identifier: bool,

    /// Restrict the edit to the subtree carrying this identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targeted_identifier: Option<String>,
}

/// Messages a client may send
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Liveness probe
    #[serde(rename = "__ping__")]
    Ping,

    /// Bind the socket to a graph instance and catch up
    #[serde(rename = "registerUserOnGraph", rename_all = "camelCase")]
    RegisterUserOnGraph {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        graph_key: String,
        sheet_id: String,
        user_id: String,
        user_name: String,
        #[serde(default)]
        from_timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Clean unbind from a graph instance
    #[serde(rename = "disconnectUserOnGraph", rename_all = "camelCase")]
    DisconnectUserOnGraph {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        graph_key: String,
        user_id: String,
    },

    /// Bind the socket to a node-config instance and catch up
    #[serde(rename = "registerUserOnNodeConfig", rename_all = "camelCase")]
    RegisterUserOnNodeConfig {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        node_config_key: String,
        user_id: String,
        user_name: String,
        #[serde(default)]
        from_timestamp: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Clean unbind from a node-config instance
    #[serde(rename = "disconnectUserOnNodeConfig", rename_all = "camelCase")]
    DisconnectUserOnNodeConfig {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        node_config_key: String,
        user_id: String,
    },

    /// Edit nodes/edges of the bound graph
    #[serde(rename = "applyInstructionToGraph", rename_all = "camelCase")]
    ApplyInstructionToGraph {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        instructions: Vec<GraphInstruction>,
    },

    /// Edit the bound node-config content tree
    #[serde(rename = "applyInstructionToNodeConfig", rename_all = "camelCase")]
    ApplyInstructionToNodeConfig {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        instructions: Vec<ConfigInstruction>,
    },

    /// Request fresh IDs for client-side preview
    #[serde(rename = "generateUniqueId", rename_all = "camelCase")]
    GenerateUniqueId {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        /// Slots to fill; the reply carries the same array populated
        ids: Vec<Value>,
    },

    /// Atomic multi-create of nodes and edges
    #[serde(rename = "batchCreateElements", rename_all = "camelCase")]
    BatchCreateElements {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        sheet_id: String,
        #[serde(default)]
        nodes: Vec<Value>,
        #[serde(default)]
        edges: Vec<Value>,
    },

    /// Atomic multi-delete of nodes and edges
    #[serde(rename = "batchDeleteElements", rename_all = "camelCase")]
    BatchDeleteElements {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        sheet_id: String,
        #[serde(default)]
        node_keys: Vec<String>,
        #[serde(default)]
        edge_keys: Vec<String>,
    },

    /// Add a sheet to the bound graph
    #[serde(rename = "createSheet", rename_all = "camelCase")]
    CreateSheet {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        key: String,
        name: String,
    },

    /// Rename a sheet
    #[serde(rename = "renameSheet", rename_all = "camelCase")]
    RenameSheet {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        key: String,
        name: String,
    },

    /// Delete a sheet and everything on it
    #[serde(rename = "deleteSheet", rename_all = "camelCase")]
    DeleteSheet {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        key: String,
    },

    /// Synchronous flush of the bound instance
    #[serde(rename = "forceSave", rename_all = "camelCase")]
    ForceSave {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Enable/disable the periodic flusher for the bound instance
    #[serde(rename = "toggleAutoSave", rename_all = "camelCase")]
    ToggleAutoSave {
        #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        enabled: bool,
    },
}

impl ClientMessage {
    /// The correlation id, when the request carries one
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Ping => None,
            ClientMessage::RegisterUserOnGraph { request_id, .. }
            | ClientMessage::DisconnectUserOnGraph { request_id, .. }
            | ClientMessage::RegisterUserOnNodeConfig { request_id, .. }
            | ClientMessage::DisconnectUserOnNodeConfig { request_id, .. }
            | ClientMessage::ApplyInstructionToGraph { request_id, .. }
            | ClientMessage::ApplyInstructionToNodeConfig { request_id, .. }
            | ClientMessage::GenerateUniqueId { request_id, .. }
            | ClientMessage::BatchCreateElements { request_id, .. }
            | ClientMessage::BatchDeleteElements { request_id, .. }
            | ClientMessage::CreateSheet { request_id, .. }
            | ClientMessage::RenameSheet { request_id, .. }
            | ClientMessage::DeleteSheet { request_id, .. }
            | ClientMessage::ForceSave { request_id, .. }
            | ClientMessage::ToggleAutoSave { request_id, .. } => request_id.as_deref(),
        }
    }
}

/// Messages only the server originates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Liveness reply
    #[serde(rename = "__pong__")]
    Pong,

    /// Dirty/clean indicator after any flush
    #[serde(rename = "saveStatus", rename_all = "camelCase")]
    SaveStatus {
        last_save_time: i64,
        has_unsaved_changes: bool,
        auto_save_enabled: bool,
    },

    /// A peer left the graph instance
    #[serde(rename = "disconnectedUserOnGraph", rename_all = "camelCase")]
    DisconnectedUserOnGraph { graph_key: String, user_id: String },

    /// A peer left the node-config instance
    #[serde(rename = "disconnectedUserOnNodeConfig", rename_all = "camelCase")]
    DisconnectedUserOnNodeConfig {
        node_config_key: String,
        user_id: String,
    },
}

/// Build a `{_id, _response: {ok, message?}, …extra}` reply envelope
pub fn response_envelope(
    request_id: &str,
    ok: bool,
    message: Option<&str>,
    extra: Map<String, Value>,
) -> Value {
    let mut response = json!({"ok": ok});
    if let Some(message) = message {
        response["message"] = json!(message);
    }
    let mut envelope = Map::new();
    envelope.insert("_id".to_string(), json!(request_id));
    envelope.insert("_response".to_string(), response);
    envelope.extend(extra);
    Value::Object(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_parses() {
        let msg: ClientMessage = serde_json::from_value(json!({"type": "__ping__"})).unwrap();
        assert!(matches!(msg, ClientMessage::Ping));
    }

    #[test]
    fn test_register_parses() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "registerUserOnGraph",
            "_id": "42",
            "graphKey": "g1",
            "sheetId": "0",
            "userId": "u1",
            "userName": "Ada",
            "fromTimestamp": 1000
        }))
        .unwrap();
        assert_eq!(msg.request_id(), Some("42"));
        match msg {
            ClientMessage::RegisterUserOnGraph {
                graph_key,
                from_timestamp,
                ..
            } => {
                assert_eq!(graph_key, "g1");
                assert_eq!(from_timestamp, 1000);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_apply_instruction_parses() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "applyInstructionToGraph",
            "instructions": [{
                "sheetId": "0",
                "nodeId": "n1",
                "i": {"op": "set", "path": "position.x", "value": 500},
                "applyUniqIdentifier": true
            }]
        }))
        .unwrap();
        match msg {
            ClientMessage::ApplyInstructionToGraph { instructions, .. } => {
                assert_eq!(instructions.len(), 1);
                assert_eq!(instructions[0].node_id.as_deref(), Some("n1"));
                assert!(instructions[0].apply_uniq_identifier);
                assert!(instructions[0].edge_id.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_value(json!({"type": "makeCoffee"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let wire = serde_json::to_value(ServerMessage::SaveStatus {
            last_save_time: 17,
            has_unsaved_changes: false,
            auto_save_enabled: true,
        })
        .unwrap();
        assert_eq!(wire["type"], "saveStatus");
        assert_eq!(wire["lastSaveTime"], 17);

        let wire = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(wire["type"], "__pong__");
    }

    #[test]
    fn test_response_envelope_shape() {
        let mut extra = Map::new();
        extra.insert("missingMessages".to_string(), json!([]));
        let envelope = response_envelope("7", true, None, extra);
        assert_eq!(envelope["_id"], "7");
        assert_eq!(envelope["_response"]["ok"], true);
        assert!(envelope["_response"].get("message").is_none());
        assert_eq!(envelope["missingMessages"], json!([]));

        let envelope = response_envelope("8", false, Some("handled elsewhere"), Map::new());
        assert_eq!(envelope["_response"]["ok"], false);
        assert_eq!(envelope["_response"]["message"], "handled elsewhere");
    }
}
