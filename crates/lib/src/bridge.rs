//! Message bridge: relays chat lines between a customer and its agent, and delivers notices.
//!
//! Delivery goes through the channel registry (`send(address, text)`). Text is passed through
//! unchanged; failures are logged and reported to the caller, never retried. A relayed line that
//! cannot be delivered bounces back to its sender as a notice.

use crate::address::{Address, AddressKey};
use crate::channels::ChannelRegistry;
use crate::conversation::{Conversation, ConversationState};
use crate::error::{HandoffError, Result};
use crate::router::notices;
use std::sync::Arc;

/// A message the router wants delivered once the registry lock is released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub to: Address,
    pub text: String,
    /// Set for chat lines relayed between customer and agent: who wrote the line.
    pub relayed_from: Option<Address>,
}

impl Outgoing {
    pub fn new(to: &Address, text: impl Into<String>) -> Self {
        Self {
            to: to.clone(),
            text: text.into(),
            relayed_from: None,
        }
    }
}

/// A message the channel refused, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Undelivered {
    pub message: Outgoing,
    pub error: HandoffError,
}

impl Undelivered {
    /// Notice for the author of a relayed line that never arrived. None for plain notices, so a
    /// failed bounce never produces another one.
    pub fn bounce(&self) -> Option<Outgoing> {
        let author = self.message.relayed_from.as_ref()?;
        Some(Outgoing::new(
            author,
            notices::undelivered(self.message.to.display_name("the other side")),
        ))
    }
}

#[derive(Clone)]
pub struct MessageBridge {
    channels: Arc<ChannelRegistry>,
}

impl MessageBridge {
    pub fn new(channels: Arc<ChannelRegistry>) -> Self {
        Self { channels }
    }

    /// The other side of a connected conversation for a line sent by `from`: customer lines go
    /// to the agent, agent lines to the customer. None unless the conversation is ConnectedToAgent
    /// and `from` is one of its two endpoints.
    pub fn relay(conversation: &Conversation, from: &AddressKey, text: &str) -> Option<Outgoing> {
        if conversation.state != ConversationState::ConnectedToAgent {
            return None;
        }
        let agent = conversation.agent.as_ref()?;
        let (to, author) = if *from == conversation.customer.key {
            (agent, &conversation.customer)
        } else if *from == agent.key {
            (&conversation.customer, agent)
        } else {
            return None;
        };
        Some(Outgoing {
            relayed_from: Some(author.clone()),
            ..Outgoing::new(to, text)
        })
    }

    /// Send one message through the channel that owns the target address.
    pub async fn send(&self, to: &Address, text: &str) -> Result<()> {
        let handle = self
            .channels
            .get(to.channel_id())
            .await
            .ok_or_else(|| HandoffError::ChannelNotRegistered(to.channel_id().to_string()))?;
        handle
            .send_message(to.conversation_id(), text)
            .await
            .map_err(|reason| HandoffError::Delivery {
                target: to.key.clone(),
                reason,
            })
    }

    /// Send every message in order. Returns the failures; delivery never stops at the first one.
    pub async fn deliver(&self, outgoing: &[Outgoing]) -> Vec<Undelivered> {
        let mut failures = Vec::new();
        for msg in outgoing {
            if let Err(error) = self.send(&msg.to, &msg.text).await {
                log::warn!("bridge: {}", error);
                failures.push(Undelivered {
                    message: msg.clone(),
                    error,
                });
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> Conversation {
        let mut c = Conversation::new(Address::new("web", "alice").with_name("Alice"));
        c.agent = Some(Address::new("telegram", "bob").with_name("Bob"));
        c.state = ConversationState::ConnectedToAgent;
        c
    }

    #[test]
    fn relay_picks_the_other_side() {
        let c = connected();
        let to_agent = MessageBridge::relay(&c, &AddressKey::new("web", "alice"), "hi").unwrap();
        assert_eq!(to_agent.to.key, AddressKey::new("telegram", "bob"));
        assert_eq!(to_agent.text, "hi");
        let to_customer = MessageBridge::relay(&c, &AddressKey::new("telegram", "bob"), "hello").unwrap();
        assert_eq!(to_customer.to.key, AddressKey::new("web", "alice"));
    }

    #[test]
    fn relay_requires_connected_endpoint() {
        let c = connected();
        assert!(MessageBridge::relay(&c, &AddressKey::new("web", "mallory"), "x").is_none());
        let waiting = Conversation::new(Address::new("web", "alice"));
        assert!(MessageBridge::relay(&waiting, &AddressKey::new("web", "alice"), "x").is_none());
    }

    #[test]
    fn relay_records_author_for_bounce() {
        let c = connected();
        let line = MessageBridge::relay(&c, &AddressKey::new("telegram", "bob"), "hello").unwrap();
        assert_eq!(line.relayed_from.as_ref().map(|a| &a.key), Some(&AddressKey::new("telegram", "bob")));

        let failed = Undelivered {
            error: HandoffError::ChannelNotRegistered("web".to_string()),
            message: line,
        };
        let notice = failed.bounce().unwrap();
        assert_eq!(notice.to.key, AddressKey::new("telegram", "bob"));
        assert_eq!(notice.text, "Your message could not be delivered to Alice.");
        assert!(notice.relayed_from.is_none());

        let plain = Undelivered {
            message: notice,
            error: HandoffError::ChannelNotRegistered("telegram".to_string()),
        };
        assert!(plain.bounce().is_none());
    }

    #[tokio::test]
    async fn deliver_keeps_going_after_a_failure() {
        let bridge = MessageBridge::new(Arc::new(ChannelRegistry::new()));
        let out = [
            Outgoing::new(&Address::new("sms", "1"), "a"),
            Outgoing::new(&Address::new("fax", "2"), "b"),
        ];
        let failures = bridge.deliver(&out).await;
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[1].message, out[1]);
    }

    #[tokio::test]
    async fn send_to_unknown_channel_fails() {
        let bridge = MessageBridge::new(Arc::new(ChannelRegistry::new()));
        let err = bridge.send(&Address::new("sms", "1"), "x").await.unwrap_err();
        assert_eq!(err, HandoffError::ChannelNotRegistered("sms".to_string()));
    }
}
