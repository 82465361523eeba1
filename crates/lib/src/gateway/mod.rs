//! Gateway: HTTP + WebSocket host transport for the handoff router.
//!
//! Single port serves the health check, the Telegram webhook, and the web channel WebSocket.
//! WebSocket protocol: first request must be `connect`; then `message` and `queue.list`
//! requests (req/res) plus `message` and `shutdown` events.

mod protocol;
mod server;

pub use protocol::{
    event_json, ConnectAuth, ConnectParams, HelloOk, MessageParams, QueueEntry, QueueSnapshot, WsRequest,
    WsResponse,
};
pub use server::{process_inbound_message, run_gateway, GatewayState, PROTOCOL_VERSION};
