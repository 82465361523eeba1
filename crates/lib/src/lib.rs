//! Deskbot handoff library: moves help desk customers from the bot to a human agent and back.
//!
//! The core is the conversation registry (state + FIFO waiting queue), the handoff router
//! (agent commands and customer routing), and the message bridge (relay between customer and
//! agent). Channels, the bot dialog, and the gateway are the host around it.

pub mod address;
pub mod agents;
pub mod bot;
pub mod bridge;
pub mod channels;
pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod init;
pub mod intent;
pub mod registry;
pub mod router;

pub use address::{Address, AddressKey};
pub use bridge::{MessageBridge, Outgoing, Undelivered};
pub use conversation::{Conversation, ConversationState};
pub use error::HandoffError;
pub use registry::ConversationRegistry;
pub use router::{Action, Dispatch, Handled, HandoffRouter};
