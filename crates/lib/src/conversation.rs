//! Conversation record and handoff state.

use crate::address::{Address, AddressKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a customer's messages currently go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversationState {
    /// Bot dialog handles the customer (initial state).
    #[default]
    ConnectedToBot,
    /// Escalated; in the waiting queue until an agent connects.
    WaitingForAgent,
    /// Bridged to a human agent.
    ConnectedToAgent,
}

impl ConversationState {
    /// True while the customer is escalated (waiting or with an agent).
    pub fn is_escalated(self) -> bool {
        !matches!(self, ConversationState::ConnectedToBot)
    }
}

/// One customer's handoff state. `agent` is Some iff `state` is ConnectedToAgent;
/// `enqueued_at` is Some iff `state` is WaitingForAgent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub customer: Address,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<Address>,
    pub state: ConversationState,
    /// Queue sequence stamped on entering WaitingForAgent; orders the waiting queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<u64>,
    /// Wall-clock time the customer started waiting (diagnostics only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_since: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(customer: Address) -> Self {
        Self {
            customer,
            agent: None,
            state: ConversationState::ConnectedToBot,
            enqueued_at: None,
            waiting_since: None,
        }
    }

    pub fn key(&self) -> &AddressKey {
        &self.customer.key
    }

    pub fn customer_name(&self) -> &str {
        self.customer.display_name("(unknown)")
    }
}
