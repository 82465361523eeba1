//! Conversation registry: every known customer conversation, the agent bindings, and the FIFO waiting queue.
//!
//! All state sits behind one mutex. Each public method is a single critical section and never
//! performs I/O; callers deliver notifications after the call returns. Reads hand out snapshots.

use crate::address::{Address, AddressKey};
use crate::conversation::{Conversation, ConversationState};
use crate::error::{HandoffError, Result};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    conversations: HashMap<AddressKey, Conversation>,
    /// Creation order, for a deterministic listing of non-waiting conversations.
    created: Vec<AddressKey>,
    /// agent -> customer, for conversations in ConnectedToAgent.
    by_agent: HashMap<AddressKey, AddressKey>,
    /// enqueue sequence -> customer. Sequences are unique, so ties cannot occur.
    waiting: BTreeMap<u64, AddressKey>,
    /// Taken off the queue by `dequeue_oldest` but not yet bound. Still WaitingForAgent.
    claimed: HashSet<AddressKey>,
    next_seq: u64,
}

impl Inner {
    fn get_or_create(&mut self, customer: &Address) -> &mut Conversation {
        if !self.conversations.contains_key(&customer.key) {
            log::debug!("registry: new conversation for {}", customer.key);
            self.created.push(customer.key.clone());
        }
        let conversation = self
            .conversations
            .entry(customer.key.clone())
            .or_insert_with(|| Conversation::new(customer.clone()));
        if customer.name.is_some() && conversation.customer.name != customer.name {
            conversation.customer.name = customer.name.clone();
        }
        conversation
    }

    /// Queue position (1 for the head) of the newly waiting customer.
    fn enqueue(&mut self, customer: &Address) -> Option<usize> {
        let seq = self.next_seq;
        let conversation = self.get_or_create(customer);
        if conversation.state.is_escalated() {
            return None;
        }
        conversation.state = ConversationState::WaitingForAgent;
        conversation.enqueued_at = Some(seq);
        conversation.waiting_since = Some(Utc::now());
        self.waiting.insert(seq, customer.key.clone());
        self.next_seq += 1;
        Some(self.waiting.len())
    }

    fn leave_queue(&mut self, customer: &AddressKey) {
        let Some(conversation) = self.conversations.get_mut(customer) else {
            return;
        };
        if let Some(seq) = conversation.enqueued_at.take() {
            self.waiting.remove(&seq);
        }
        conversation.waiting_since = None;
        self.claimed.remove(customer);
    }

    fn bind_agent(&mut self, customer: &AddressKey, agent: &Address) -> Result<Conversation> {
        if let Some(bound) = self.by_agent.get(&agent.key) {
            return Err(HandoffError::AgentAlreadyBound {
                agent: agent.key.clone(),
                customer: bound.clone(),
            });
        }
        let conversation = self
            .conversations
            .get_mut(customer)
            .ok_or_else(|| HandoffError::UnknownConversation(customer.clone()))?;
        if conversation.state == ConversationState::ConnectedToAgent {
            return Err(HandoffError::CustomerAlreadyConnected {
                customer: customer.clone(),
            });
        }
        conversation.agent = Some(agent.clone());
        conversation.state = ConversationState::ConnectedToAgent;
        self.by_agent.insert(agent.key.clone(), customer.clone());
        self.leave_queue(customer);
        self.find(customer)
    }

    fn unbind(&mut self, customer: &AddressKey) -> Result<Conversation> {
        let conversation = self
            .conversations
            .get_mut(customer)
            .ok_or_else(|| HandoffError::UnknownConversation(customer.clone()))?;
        conversation.state = ConversationState::ConnectedToBot;
        if let Some(agent) = conversation.agent.take() {
            self.by_agent.remove(&agent.key);
        }
        self.leave_queue(customer);
        self.find(customer)
    }

    fn find(&self, customer: &AddressKey) -> Result<Conversation> {
        self.conversations
            .get(customer)
            .cloned()
            .ok_or_else(|| HandoffError::UnknownConversation(customer.clone()))
    }
}

/// Registry of customer conversations. Construct one per process and share it behind an `Arc`.
pub struct ConversationRegistry {
    inner: Mutex<Inner>,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Every critical section leaves the maps consistent, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn find_by_customer(&self, customer: &AddressKey) -> Option<Conversation> {
        self.lock().conversations.get(customer).cloned()
    }

    /// Conversation the agent is currently bridged to, if any.
    pub fn find_by_agent(&self, agent: &AddressKey) -> Option<Conversation> {
        let g = self.lock();
        let customer = g.by_agent.get(agent)?;
        g.conversations.get(customer).cloned()
    }

    /// Existing conversation for the customer, or a new one in ConnectedToBot.
    /// A display name on `customer` replaces the stored one.
    pub fn get_or_create(&self, customer: &Address) -> Conversation {
        self.lock().get_or_create(customer).clone()
    }

    /// Move the customer from ConnectedToBot to WaitingForAgent. Returns false, changing nothing,
    /// when the customer is already waiting or connected to an agent.
    pub fn enqueue(&self, customer: &Address) -> bool {
        self.enqueue_position(customer).is_some()
    }

    /// Like [`enqueue`](Self::enqueue), but reports the customer's place in the queue
    /// (1 for the head) as seen inside the same critical section.
    pub fn enqueue_position(&self, customer: &Address) -> Option<usize> {
        self.lock().enqueue(customer)
    }

    /// Number of conversations in WaitingForAgent.
    pub fn pending_count(&self) -> usize {
        let g = self.lock();
        g.waiting.len() + g.claimed.len()
    }

    /// Snapshot of all conversations: waiting ones first in queue order, then the rest in creation order.
    pub fn list_all(&self) -> Vec<Conversation> {
        let g = self.lock();
        let mut out: Vec<Conversation> = g
            .created
            .iter()
            .filter_map(|k| g.conversations.get(k))
            .filter(|c| c.state == ConversationState::WaitingForAgent)
            .cloned()
            .collect();
        out.sort_by_key(|c| c.enqueued_at);
        out.extend(
            g.created
                .iter()
                .filter_map(|k| g.conversations.get(k))
                .filter(|c| c.state != ConversationState::WaitingForAgent)
                .cloned(),
        );
        out
    }

    /// Take the longest-waiting conversation off the queue and return a snapshot of it.
    ///
    /// The conversation stays in WaitingForAgent (and counts as pending) until the caller binds it
    /// with [`bind_agent`](Self::bind_agent) or hands it back to the bot with
    /// [`unbind_agent`](Self::unbind_agent). Another caller may still bind it in between, so code
    /// that needs pop and bind as one step uses [`connect_next`](Self::connect_next).
    pub fn dequeue_oldest(&self) -> Option<Conversation> {
        let mut g = self.lock();
        let (_, customer) = g.waiting.pop_first()?;
        g.claimed.insert(customer.clone());
        g.conversations.get(&customer).cloned()
    }

    /// Bridge `agent` to the customer's conversation. Fails without changing anything if the agent
    /// already serves someone or the customer is already connected to an agent.
    pub fn bind_agent(&self, customer: &AddressKey, agent: &Address) -> Result<Conversation> {
        self.lock().bind_agent(customer, agent)
    }

    /// Pop the longest-waiting customer and bind it to `agent` in one critical section.
    /// Ok(None) when nobody is waiting.
    pub fn connect_next(&self, agent: &Address) -> Result<Option<Conversation>> {
        let mut g = self.lock();
        if let Some(bound) = g.by_agent.get(&agent.key) {
            return Err(HandoffError::AgentAlreadyBound {
                agent: agent.key.clone(),
                customer: bound.clone(),
            });
        }
        let Some(customer) = g.waiting.values().next().cloned() else {
            return Ok(None);
        };
        g.bind_agent(&customer, agent).map(Some)
    }

    /// Return the customer to the bot, releasing its agent (if any).
    pub fn unbind_agent(&self, customer: &AddressKey) -> Result<Conversation> {
        self.lock().unbind(customer)
    }

    /// Find the conversation bridged to `agent` and return it to the bot in one critical section.
    /// Returns the conversation as it was before the unbind (agent still set) or None if the agent
    /// is not connected to anyone.
    pub fn release_agent(&self, agent: &AddressKey) -> Option<Conversation> {
        let mut g = self.lock();
        let customer = g.by_agent.get(agent)?.clone();
        let before = g.conversations.get(&customer).cloned()?;
        match g.unbind(&customer) {
            Ok(_) => Some(before),
            Err(e) => {
                log::warn!("registry: release_agent {}: {}", agent, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn customer(id: &str) -> Address {
        Address::new("web", id).with_name(id)
    }

    fn agent(id: &str) -> Address {
        Address::new("telegram", id).with_name(format!("agent {id}"))
    }

    fn assert_pending_matches(registry: &ConversationRegistry) {
        let waiting = registry
            .list_all()
            .iter()
            .filter(|c| c.state == ConversationState::WaitingForAgent)
            .count();
        assert_eq!(registry.pending_count(), waiting);
        for c in registry.list_all() {
            assert_eq!(c.agent.is_some(), c.state == ConversationState::ConnectedToAgent);
            assert_eq!(c.enqueued_at.is_some(), c.state == ConversationState::WaitingForAgent);
        }
    }

    #[test]
    fn get_or_create_starts_connected_to_bot() {
        let registry = ConversationRegistry::new();
        assert!(registry.find_by_customer(&customer("a").key).is_none());
        let c = registry.get_or_create(&customer("a"));
        assert_eq!(c.state, ConversationState::ConnectedToBot);
        assert_eq!(registry.get_or_create(&customer("a")), c);
        assert_eq!(registry.list_all().len(), 1);
    }

    #[test]
    fn get_or_create_refreshes_name() {
        let registry = ConversationRegistry::new();
        registry.get_or_create(&Address::new("web", "1"));
        let c = registry.get_or_create(&Address::new("web", "1").with_name("Alice"));
        assert_eq!(c.customer_name(), "Alice");
        let c = registry.get_or_create(&Address::new("web", "1"));
        assert_eq!(c.customer_name(), "Alice");
    }

    #[test]
    fn dequeue_is_fifo() {
        let registry = ConversationRegistry::new();
        for id in ["c1", "c2", "c3", "c4"] {
            assert!(registry.enqueue(&customer(id)));
        }
        let mut order = Vec::new();
        for n in 0..4 {
            let a = agent(&n.to_string());
            let c = registry.connect_next(&a).unwrap().unwrap();
            order.push(c.key().conversation_id.clone());
            assert_pending_matches(&registry);
        }
        assert_eq!(order, ["c1", "c2", "c3", "c4"]);
        assert!(registry.connect_next(&agent("x")).unwrap().is_none());
    }

    #[test]
    fn enqueue_twice_is_noop() {
        let registry = ConversationRegistry::new();
        assert!(registry.enqueue(&customer("a")));
        let before = registry.list_all();
        assert!(!registry.enqueue(&customer("a")));
        assert_eq!(registry.list_all(), before);
        assert_eq!(registry.pending_count(), 1);

        registry.connect_next(&agent("1")).unwrap();
        let before = registry.list_all();
        assert!(!registry.enqueue(&customer("a")));
        assert_eq!(registry.list_all(), before);
        assert_eq!(registry.pending_count(), 0);
    }

    #[test]
    fn bind_and_find_by_agent() {
        let registry = ConversationRegistry::new();
        registry.enqueue(&customer("a"));
        registry.enqueue(&customer("b"));
        let bob = agent("bob");
        let c = registry.bind_agent(&customer("a").key, &bob).unwrap();
        assert_eq!(c.state, ConversationState::ConnectedToAgent);
        assert_eq!(registry.find_by_agent(&bob.key).unwrap().key(), &customer("a").key);
        assert_pending_matches(&registry);

        let err = registry.bind_agent(&customer("b").key, &bob).unwrap_err();
        assert_eq!(
            err,
            HandoffError::AgentAlreadyBound {
                agent: bob.key.clone(),
                customer: customer("a").key,
            }
        );
        assert_eq!(
            registry.find_by_customer(&customer("b").key).unwrap().state,
            ConversationState::WaitingForAgent
        );

        registry.unbind_agent(&customer("a").key).unwrap();
        assert!(registry.find_by_agent(&bob.key).is_none());
        assert_eq!(
            registry.find_by_customer(&customer("a").key).unwrap().state,
            ConversationState::ConnectedToBot
        );
        registry.bind_agent(&customer("b").key, &bob).unwrap();
        assert_pending_matches(&registry);
    }

    #[test]
    fn bind_rejects_customer_with_another_agent() {
        let registry = ConversationRegistry::new();
        registry.enqueue(&customer("a"));
        registry.bind_agent(&customer("a").key, &agent("1")).unwrap();
        let err = registry.bind_agent(&customer("a").key, &agent("2")).unwrap_err();
        assert!(matches!(err, HandoffError::CustomerAlreadyConnected { .. }));
        assert!(registry.find_by_agent(&agent("2").key).is_none());
    }

    #[test]
    fn bind_unknown_customer_fails() {
        let registry = ConversationRegistry::new();
        let err = registry.bind_agent(&customer("ghost").key, &agent("1")).unwrap_err();
        assert_eq!(err, HandoffError::UnknownConversation(customer("ghost").key));
    }

    #[test]
    fn dequeue_then_bind_agent() {
        let registry = ConversationRegistry::new();
        registry.enqueue(&customer("a"));
        registry.enqueue(&customer("b"));
        let c = registry.dequeue_oldest().unwrap();
        assert_eq!(c.key(), &customer("a").key);
        assert_eq!(c.state, ConversationState::WaitingForAgent);
        // still pending until bound, but not handed out twice
        assert_eq!(registry.pending_count(), 2);
        assert_pending_matches(&registry);
        assert!(registry.find_by_customer(&customer("a").key).is_some());

        let bound = registry.bind_agent(c.key(), &agent("1")).unwrap();
        assert_eq!(bound.state, ConversationState::ConnectedToAgent);
        assert_eq!(registry.pending_count(), 1);
        assert_pending_matches(&registry);

        let next = registry.dequeue_oldest().unwrap();
        assert_eq!(next.key(), &customer("b").key);
        assert!(registry.dequeue_oldest().is_none());
    }

    #[test]
    fn dequeued_customer_skipped_by_connect_next() {
        let registry = ConversationRegistry::new();
        registry.enqueue(&customer("a"));
        registry.enqueue(&customer("b"));
        let a = registry.dequeue_oldest().unwrap();
        let c = registry.connect_next(&agent("1")).unwrap().unwrap();
        assert_eq!(c.key(), &customer("b").key);

        // the agent is busy, so the dequeued customer stays waiting
        assert!(registry.bind_agent(a.key(), &agent("1")).is_err());
        assert_eq!(registry.pending_count(), 1);
        assert_pending_matches(&registry);

        registry.unbind_agent(a.key()).unwrap();
        assert_eq!(registry.pending_count(), 0);
        assert_pending_matches(&registry);
        assert!(registry.enqueue(&customer("a")));
    }

    #[test]
    fn enqueue_position_counts_customers_ahead() {
        let registry = ConversationRegistry::new();
        assert_eq!(registry.enqueue_position(&customer("a")), Some(1));
        assert_eq!(registry.enqueue_position(&customer("b")), Some(2));
        assert_eq!(registry.enqueue_position(&customer("a")), None);
        registry.connect_next(&agent("1")).unwrap();
        assert_eq!(registry.enqueue_position(&customer("c")), Some(2));
    }

    #[test]
    fn concurrent_enqueue_positions_are_distinct() {
        const N: usize = 32;
        let registry = Arc::new(ConversationRegistry::new());
        let mut positions: Vec<usize> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..N)
                .map(|i| {
                    let registry = registry.clone();
                    s.spawn(move || {
                        registry
                            .enqueue_position(&customer(&format!("c{i}")))
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        positions.sort_unstable();
        assert_eq!(positions, (1..=N).collect::<Vec<_>>());
    }

    #[test]
    fn connect_next_with_bound_agent_leaves_queue_alone() {
        let registry = ConversationRegistry::new();
        registry.enqueue(&customer("a"));
        registry.enqueue(&customer("b"));
        registry.connect_next(&agent("1")).unwrap();
        assert!(registry.connect_next(&agent("1")).is_err());
        assert_eq!(registry.pending_count(), 1);
    }

    #[test]
    fn release_agent_returns_previous_binding() {
        let registry = ConversationRegistry::new();
        assert!(registry.release_agent(&agent("1").key).is_none());
        registry.enqueue(&customer("a"));
        registry.connect_next(&agent("1")).unwrap();
        let before = registry.release_agent(&agent("1").key).unwrap();
        assert_eq!(before.agent.as_ref().map(|a| &a.key), Some(&agent("1").key));
        assert!(registry.find_by_agent(&agent("1").key).is_none());
        assert_pending_matches(&registry);
    }

    #[test]
    fn list_all_orders_waiting_first() {
        let registry = ConversationRegistry::new();
        registry.get_or_create(&customer("bot1"));
        registry.get_or_create(&customer("w1"));
        registry.enqueue(&customer("w2"));
        registry.get_or_create(&customer("bot2"));
        registry.enqueue(&customer("w1"));
        let names: Vec<_> = registry
            .list_all()
            .iter()
            .map(|c| c.customer_name().to_string())
            .collect();
        // queue order, not creation order
        assert_eq!(names, ["w2", "w1", "bot1", "bot2"]);
    }

    #[test]
    fn requeue_after_resume_goes_to_back() {
        let registry = ConversationRegistry::new();
        registry.enqueue(&customer("a"));
        registry.connect_next(&agent("1")).unwrap();
        registry.enqueue(&customer("b"));
        registry.unbind_agent(&customer("a").key).unwrap();
        assert!(registry.enqueue(&customer("a")));
        let first = registry.connect_next(&agent("2")).unwrap().unwrap();
        assert_eq!(first.key(), &customer("b").key);
    }

    #[test]
    fn concurrent_connects_bind_distinct_customers() {
        const N: usize = 32;
        let registry = Arc::new(ConversationRegistry::new());
        std::thread::scope(|s| {
            for i in 0..N {
                let registry = registry.clone();
                s.spawn(move || assert!(registry.enqueue(&customer(&format!("c{i}")))));
            }
        });
        assert_eq!(registry.pending_count(), N);

        let results: Vec<Conversation> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..N)
                .map(|i| {
                    let registry = registry.clone();
                    s.spawn(move || {
                        registry
                            .connect_next(&agent(&format!("a{i}")))
                            .unwrap()
                            .unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let customers: std::collections::HashSet<_> =
            results.iter().map(|c| c.key().clone()).collect();
        assert_eq!(customers.len(), N);
        for i in 0..N {
            assert!(registry.find_by_agent(&agent(&format!("a{i}")).key).is_some());
        }
        assert_eq!(registry.pending_count(), 0);
        assert_pending_matches(&registry);
    }
}
