//! Gateway WebSocket protocol types (connect, message, queue.list, events).

use crate::conversation::{Conversation, ConversationState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Wire request: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Wire response: `{ "type": "res", "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WsResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

/// Wire event: `{ "type": "event", "event", "payload" }`.
pub fn event_json(event: &str, payload: serde_json::Value) -> String {
    serde_json::json!({ "type": "event", "event": event, "payload": payload }).to_string()
}

/// Params for "connect". Without a conversation id the gateway assigns one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub max_protocol: Option<u32>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub auth: ConnectAuth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAuth {
    pub token: Option<String>,
}

/// Server hello-ok payload after successful connect.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type")]
    pub typ: String,
    pub protocol: u32,
    pub conversation_id: String,
    /// True when this address is on the agent allow-list.
    pub agent: bool,
}

/// Params for "message": one chat line from the socket's conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParams {
    pub text: String,
}

/// Payload for "queue.list".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub pending: usize,
    pub conversations: Vec<QueueEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub customer: String,
    pub name: Option<String>,
    pub state: ConversationState,
    pub agent: Option<String>,
    pub waiting_since: Option<DateTime<Utc>>,
}

impl From<&Conversation> for QueueEntry {
    fn from(c: &Conversation) -> Self {
        Self {
            customer: c.customer.key.to_string(),
            name: c.customer.name.clone(),
            state: c.state,
            agent: c.agent.as_ref().map(|a| a.key.to_string()),
            waiting_since: c.waiting_since,
        }
    }
}
