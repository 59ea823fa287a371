//! Cluster wire format
//!
//! Envelopes travel as newline-delimited JSON over both channels. Three
//! envelope kinds exist: `broadcast`, `direct` and `response`; ownership
//! announcements are the well-known payloads, everything else is
//! application-defined JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Envelope kind discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeKind {
    /// Fan-out to every subscriber
    Broadcast,
    /// Addressed request over the direct channel
    Direct,
    /// Reply correlated to a direct request
    Response,
}

/// One message on a cluster channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Message id (fresh UUID, used as the correlation id for requests)
    pub id: String,

    /// Identity of the sending peer
    pub sender_id: String,

    /// Addressed peer, set on direct and response envelopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,

    /// Envelope kind
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,

    /// Message body
    pub payload: Value,

    /// Send time (Unix millis)
    pub timestamp: i64,

    /// Id of the request this envelope answers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

impl Envelope {
    /// Build a broadcast envelope
    pub fn broadcast(sender_id: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            target_id: None,
            kind: EnvelopeKind::Broadcast,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            response_id: None,
        }
    }

    /// Build a direct request envelope
    pub fn direct(sender_id: &str, target_id: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            target_id: Some(target_id.to_string()),
            kind: EnvelopeKind::Direct,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            response_id: None,
        }
    }

    /// Build the response to a direct request
    pub fn response(sender_id: &str, request: &Envelope, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.to_string(),
            target_id: Some(request.sender_id.clone()),
            kind: EnvelopeKind::Response,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
            response_id: Some(request.id.clone()),
        }
    }

    /// Parse a well-known cluster payload, if the body is one
    pub fn cluster_payload(&self) -> Option<ClusterPayload> {
        serde_json::from_value(self.payload.clone()).ok()
    }

    /// Serialize to one wire line (newline appended by the writer)
    pub fn to_line(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse one wire line
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Well-known cluster message bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClusterPayload {
    /// Sender announces it has loaded the instance
    IManageInstance {
        #[serde(rename = "instanceKey")]
        instance_key: String,
    },

    /// Sender announces it evicted the instance
    IReleaseInstance {
        #[serde(rename = "instanceKey")]
        instance_key: String,
    },
}

impl ClusterPayload {
    /// The instance key the announcement concerns
    pub fn instance_key(&self) -> &str {
        match self {
            ClusterPayload::IManageInstance { instance_key }
            | ClusterPayload::IReleaseInstance { instance_key } => instance_key,
        }
    }

    /// Serialize into an envelope body
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_envelope_shape() {
        let payload = ClusterPayload::IManageInstance {
            instance_key: "g1".to_string(),
        };
        let env = Envelope::broadcast("peer-a", payload.to_value());
        let wire: Value = serde_json::from_str(&env.to_line().unwrap()).unwrap();
        assert_eq!(wire["type"], "broadcast");
        assert_eq!(wire["senderId"], "peer-a");
        assert_eq!(wire["payload"]["type"], "IManageInstance");
        assert_eq!(wire["payload"]["instanceKey"], "g1");
        assert!(wire.get("targetId").is_none());
    }

    #[test]
    fn test_response_correlates_to_request() {
        let req = Envelope::direct("peer-a", "peer-b", json!({"ask": "load"}));
        let resp = Envelope::response("peer-b", &req, json!({"ok": true}));
        assert_eq!(resp.kind, EnvelopeKind::Response);
        assert_eq!(resp.response_id.as_deref(), Some(req.id.as_str()));
        assert_eq!(resp.target_id.as_deref(), Some("peer-a"));
    }

    #[test]
    fn test_cluster_payload_round_trip() {
        let env = Envelope::broadcast(
            "peer-a",
            ClusterPayload::IReleaseInstance {
                instance_key: "g2".to_string(),
            }
            .to_value(),
        );
        let parsed = Envelope::from_line(&env.to_line().unwrap()).unwrap();
        assert_eq!(
            parsed.cluster_payload(),
            Some(ClusterPayload::IReleaseInstance {
                instance_key: "g2".to_string()
            })
        );
    }

    #[test]
    fn test_app_payload_is_not_cluster_payload() {
        let env = Envelope::direct("peer-a", "peer-b", json!({"custom": 1}));
        assert_eq!(env.cluster_payload(), None);
    }
}
