//! Channel registry: register and lookup channels by id.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Handle to a running channel (stop, send message).
#[async_trait]
pub trait ChannelHandle: Send + Sync {
    /// Channel id (e.g. "telegram"); the channel half of every address it serves.
    fn id(&self) -> &str;
    /// Stop the channel connector.
    fn stop(&self);
    /// Deliver text to a conversation on this channel. Errors are transport-specific and not retried.
    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String>;
}

/// Registry of channel ids to handles. Shared by the gateway and the message bridge.
pub struct ChannelRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<dyn ChannelHandle>>>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a handle under its id; a previously registered handle with that id is stopped.
    pub async fn register(&self, handle: Arc<dyn ChannelHandle>) {
        let id = handle.id().to_string();
        let mut g = self.inner.write().await;
        if let Some(old) = g.insert(id.clone(), handle) {
            log::debug!("channel {} re-registered, stopping previous handle", id);
            old.stop();
        }
    }

    pub async fn get(&self, id: &str) -> Option<Arc<dyn ChannelHandle>> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Stop every registered connector (shutdown).
    pub async fn stop_all(&self) {
        for handle in self.inner.read().await.values() {
            handle.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Stub {
        id: &'static str,
        stopped: AtomicBool,
    }

    #[async_trait]
    impl ChannelHandle for Stub {
        fn id(&self) -> &str {
            self.id
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }

        async fn send_message(&self, _: &str, _: &str) -> Result<(), String> {
            Ok(())
        }
    }

    fn stub(id: &'static str) -> Arc<Stub> {
        Arc::new(Stub {
            id,
            stopped: AtomicBool::new(false),
        })
    }

    #[tokio::test]
    async fn replacing_a_channel_stops_the_old_one() {
        let registry = ChannelRegistry::new();
        let old = stub("web");
        registry.register(old.clone()).await;
        registry.register(stub("telegram")).await;
        registry.register(stub("web")).await;
        assert!(old.stopped.load(Ordering::SeqCst));
        assert_eq!(registry.ids().await, ["telegram", "web"]);
        assert!(registry.get("sms").await.is_none());
    }
}
