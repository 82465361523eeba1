//! Inbound message from a channel: delivered to the gateway for handoff routing.

use crate::address::Address;

/// A message from a channel, before it is classified as agent command, bridged chat, or bot traffic.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    pub conversation_id: String,
    /// Display name reported by the transport, if any.
    pub sender_name: Option<String>,
    pub text: String,
}

impl InboundMessage {
    pub fn sender(&self) -> Address {
        let address = Address::new(&self.channel_id, &self.conversation_id);
        match &self.sender_name {
            Some(name) => address.with_name(name),
            None => address,
        }
    }
}
