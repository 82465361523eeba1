//! Communication channels (Telegram, web socket clients).
//!
//! Channel trait and registry so the gateway can start/stop connectors and the message bridge
//! can deliver text to any address. Inbound messages are sent to the gateway for handoff routing.

mod inbound;
mod registry;
mod telegram;
mod web;

pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
pub use telegram::{TelegramChannel, TelegramUpdate};
pub use web::{WebAttachment, WebChannel, WebDelivery, WEB_CHANNEL_ID};
