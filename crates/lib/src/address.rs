//! Channel addresses: who a message came from and where a reply goes.
//!
//! An address is a (channel id, conversation id) pair plus an optional display name.
//! Only the pair identifies a party; the name is presentation and may change between messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity half of an address (channel id + conversation id, e.g. telegram chat_id).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressKey {
    pub channel_id: String,
    pub conversation_id: String,
}

impl AddressKey {
    pub fn new(channel_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            conversation_id: conversation_id.into(),
        }
    }

    /// Parse the `<channel>:<conversation>` form used in config. The conversation part may contain ':'.
    pub fn parse(s: &str) -> Option<Self> {
        let (channel, conversation) = s.trim().split_once(':')?;
        let channel = channel.trim();
        let conversation = conversation.trim();
        if channel.is_empty() || conversation.is_empty() {
            return None;
        }
        Some(Self::new(channel, conversation))
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.channel_id, self.conversation_id)
    }
}

/// Opaque external endpoint of a customer or agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(flatten)]
    pub key: AddressKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Address {
    pub fn new(channel_id: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self {
            key: AddressKey::new(channel_id, conversation_id),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        self.name = if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        };
        self
    }

    pub fn channel_id(&self) -> &str {
        &self.key.channel_id
    }

    pub fn conversation_id(&self) -> &str {
        &self.key.conversation_id
    }

    /// Name for notices, falling back to `fallback` when the transport gave none.
    pub fn display_name<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}
