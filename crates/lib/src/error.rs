//! Handoff errors.

use crate::address::AddressKey;

pub type Result<T> = std::result::Result<T, HandoffError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandoffError {
    /// The agent is already bridged to a customer; state is left unchanged.
    #[error("agent {agent} is already connected to {customer}")]
    AgentAlreadyBound {
        agent: AddressKey,
        customer: AddressKey,
    },

    /// The customer is already bridged to a different agent.
    #[error("customer {customer} is already connected to an agent")]
    CustomerAlreadyConnected { customer: AddressKey },

    #[error("no conversation for {0}")]
    UnknownConversation(AddressKey),

    #[error("channel not registered: {0}")]
    ChannelNotRegistered(String),

    #[error("delivery to {target} failed: {reason}")]
    Delivery { target: AddressKey, reason: String },
}
