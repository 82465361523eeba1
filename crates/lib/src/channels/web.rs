//! Web channel: WebSocket clients of the gateway. Outbound text is broadcast and each socket
//! keeps the deliveries addressed to its own conversation. A delivery only succeeds while a socket
//! is attached to the target conversation.

use crate::channels::registry::ChannelHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

pub const WEB_CHANNEL_ID: &str = "web";

/// One outbound message for a web conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebDelivery {
    pub conversation_id: String,
    pub text: String,
}

type SocketCounts = Arc<Mutex<HashMap<String, usize>>>;

pub struct WebChannel {
    tx: broadcast::Sender<WebDelivery>,
    /// Open sockets per conversation id.
    sockets: SocketCounts,
}

impl WebChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            sockets: Arc::default(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WebDelivery> {
        self.tx.subscribe()
    }

    /// Mark a socket as serving `conversation_id` until the returned attachment is dropped.
    /// Deliveries to a conversation with no attachment fail.
    pub fn attach(&self, conversation_id: &str) -> WebAttachment {
        *lock(&self.sockets)
            .entry(conversation_id.to_string())
            .or_default() += 1;
        WebAttachment {
            sockets: self.sockets.clone(),
            conversation_id: conversation_id.to_string(),
        }
    }

    pub fn is_attached(&self, conversation_id: &str) -> bool {
        lock(&self.sockets).contains_key(conversation_id)
    }
}

fn lock(sockets: &SocketCounts) -> MutexGuard<'_, HashMap<String, usize>> {
    sockets.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live socket for one web conversation. Dropping it detaches the socket.
pub struct WebAttachment {
    sockets: SocketCounts,
    conversation_id: String,
}

impl WebAttachment {
    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }
}

impl Drop for WebAttachment {
    fn drop(&mut self) {
        let mut sockets = lock(&self.sockets);
        if let Some(count) = sockets.get_mut(&self.conversation_id) {
            *count -= 1;
            if *count == 0 {
                sockets.remove(&self.conversation_id);
            }
        }
    }
}

#[async_trait]
impl ChannelHandle for WebChannel {
    fn id(&self) -> &str {
        WEB_CHANNEL_ID
    }

    fn stop(&self) {}

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        let missing = || format!("no web client connected for {}", conversation_id);
        if !self.is_attached(conversation_id) {
            return Err(missing());
        }
        self.tx
            .send(WebDelivery {
                conversation_id: conversation_id.to_string(),
                text: text.to_string(),
            })
            .map(|_| ())
            .map_err(|_| missing())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivery_reaches_subscribers() {
        let web = WebChannel::new(8);
        let mut rx = web.subscribe();
        let _socket = web.attach("c1");
        web.send_message("c1", "hello").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            WebDelivery {
                conversation_id: "c1".to_string(),
                text: "hello".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn delivery_without_subscribers_fails() {
        let web = WebChannel::new(8);
        assert!(web.send_message("c1", "hello").await.is_err());
    }

    #[tokio::test]
    async fn delivery_to_absent_conversation_fails() {
        let web = WebChannel::new(8);
        let mut rx_a = web.subscribe();
        let _rx_b = web.subscribe();
        let a = web.attach("a");
        let _b = web.attach("b");

        assert!(web.send_message("gone", "hello").await.is_err());
        web.send_message("a", "hi a").await.unwrap();
        assert_eq!(rx_a.recv().await.unwrap().conversation_id, "a");

        drop(a);
        assert!(!web.is_attached("a"));
        assert!(web.send_message("a", "lost").await.is_err());
        assert!(web.send_message("b", "still here").await.is_ok());
    }

    #[test]
    fn attachments_are_counted() {
        let web = WebChannel::new(8);
        let first = web.attach("a");
        let second = web.attach("a");
        assert_eq!(second.conversation_id(), "a");
        drop(first);
        assert!(web.is_attached("a"));
        drop(second);
        assert!(!web.is_attached("a"));
    }
}
