//! Handoff router: classifies every inbound message and drives the conversation state machine.
//!
//! Messages from agents are matched against the command table (`admin help`, `list queue`,
//! `connect`, `resume`); other agent text is relayed to the bound customer, or answered with help
//! when the agent is not connected. Customer messages go to the bot unless the customer is
//! escalated, in which case they are relayed to the agent (or dropped while still waiting).
//!
//! Routing is split in two: [`HandoffRouter::route`] decides and mutates the registry
//! synchronously, returning the messages to send; [`HandoffRouter::handle`] then delivers them
//! through the bridge with no registry lock held, bouncing a notice back to the author of any
//! relayed line the channel refused.

mod commands;
pub mod notices;

pub use commands::{AgentCommand, CommandTable};

use crate::address::Address;
use crate::bridge::{MessageBridge, Outgoing, Undelivered};
use crate::conversation::ConversationState;
use crate::error::HandoffError;
use crate::intent::EscalationDetector;
use crate::registry::ConversationRegistry;
use std::sync::Arc;

/// What the host should do with the message after routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Hand the message to the bot dialog.
    Continue,
    /// Handled here; the bot must not see it.
    Consumed,
}

/// Routing decision plus the messages to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub action: Action,
    pub outgoing: Vec<Outgoing>,
}

impl Dispatch {
    fn consumed(outgoing: Vec<Outgoing>) -> Self {
        Self {
            action: Action::Consumed,
            outgoing,
        }
    }

    fn reply(to: &Address, text: impl Into<String>) -> Self {
        Self::consumed(vec![Outgoing::new(to, text)])
    }
}

/// Outcome of [`HandoffRouter::handle`]: the routing action and every message that could not be
/// delivered, bounce notices included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub action: Action,
    pub failures: Vec<Undelivered>,
}

pub struct HandoffRouter {
    registry: Arc<ConversationRegistry>,
    bridge: MessageBridge,
    detector: Arc<dyn EscalationDetector>,
    commands: CommandTable,
}

impl HandoffRouter {
    pub fn new(
        registry: Arc<ConversationRegistry>,
        bridge: MessageBridge,
        detector: Arc<dyn EscalationDetector>,
    ) -> Self {
        Self {
            registry,
            bridge,
            detector,
            commands: CommandTable::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConversationRegistry> {
        &self.registry
    }

    /// Route one message and deliver the resulting notices and relayed lines. When a relayed line
    /// fails, its author is told the message did not arrive.
    pub async fn handle(&self, sender: &Address, is_agent: bool, text: &str) -> Handled {
        let dispatch = self.route(sender, is_agent, text);
        let mut failures = self.bridge.deliver(&dispatch.outgoing).await;
        let bounces: Vec<Outgoing> = failures.iter().filter_map(Undelivered::bounce).collect();
        if !bounces.is_empty() {
            let lost = self.bridge.deliver(&bounces).await;
            failures.extend(lost);
        }
        Handled {
            action: dispatch.action,
            failures,
        }
    }

    /// Decide what to do with one message, applying any state transition. Performs no I/O.
    pub fn route(&self, sender: &Address, is_agent: bool, text: &str) -> Dispatch {
        if is_agent {
            self.route_agent(sender, text)
        } else {
            self.route_customer(sender, text)
        }
    }

    fn route_agent(&self, agent: &Address, text: &str) -> Dispatch {
        match self.commands.classify(text) {
            Some(AgentCommand::AdminHelp) => Dispatch::reply(agent, notices::AGENT_HELP),
            Some(AgentCommand::ListQueue) => {
                let all = self.registry.list_all();
                Dispatch::reply(agent, notices::current_conversations(&all))
            }
            Some(AgentCommand::Connect) => self.connect(agent),
            Some(AgentCommand::Resume) => self.resume(agent),
            None => match self.registry.find_by_agent(&agent.key) {
                Some(conversation) => {
                    Dispatch::consumed(MessageBridge::relay(&conversation, &agent.key, text).into_iter().collect())
                }
                None => Dispatch::reply(agent, notices::AGENT_HELP),
            },
        }
    }

    fn connect(&self, agent: &Address) -> Dispatch {
        match self.registry.connect_next(agent) {
            Ok(None) => Dispatch::reply(agent, notices::NO_CUSTOMERS_WAITING),
            Ok(Some(conversation)) => {
                log::info!(
                    "handoff: agent {} connected to {} ({} still waiting)",
                    agent.key,
                    conversation.key(),
                    self.registry.pending_count()
                );
                Dispatch::consumed(vec![
                    Outgoing::new(agent, notices::agent_connected(conversation.customer_name())),
                    Outgoing::new(
                        &conversation.customer,
                        notices::customer_connected(agent.display_name("(unknown)")),
                    ),
                ])
            }
            Err(HandoffError::AgentAlreadyBound { customer, .. }) => {
                let name = self
                    .registry
                    .find_by_customer(&customer)
                    .map(|c| c.customer_name().to_string())
                    .unwrap_or_else(|| customer.to_string());
                Dispatch::reply(agent, notices::already_connected(&name))
            }
            Err(e) => {
                log::warn!("handoff: connect for {} failed: {}", agent.key, e);
                Dispatch::reply(agent, format!("Could not connect: {}", e))
            }
        }
    }

    fn resume(&self, agent: &Address) -> Dispatch {
        let Some(conversation) = self.registry.release_agent(&agent.key) else {
            return Dispatch::reply(agent, notices::NOT_CONNECTED);
        };
        let pending = self.registry.pending_count();
        log::info!(
            "handoff: agent {} returned {} to the bot ({} waiting)",
            agent.key,
            conversation.key(),
            pending
        );
        Dispatch::consumed(vec![
            Outgoing::new(agent, notices::disconnected(pending)),
            Outgoing::new(&conversation.customer, notices::BACK_TO_BOT),
        ])
    }

    fn route_customer(&self, customer: &Address, text: &str) -> Dispatch {
        let conversation = self.registry.get_or_create(customer);
        match conversation.state {
            ConversationState::ConnectedToAgent => {
                Dispatch::consumed(MessageBridge::relay(&conversation, &customer.key, text).into_iter().collect())
            }
            ConversationState::WaitingForAgent => {
                log::debug!("handoff: {} is waiting for an agent, message dropped", customer.key);
                Dispatch::consumed(Vec::new())
            }
            ConversationState::ConnectedToBot if self.detector.wants_human(text) => {
                let Some(position) = self.registry.enqueue_position(customer) else {
                    return Dispatch::consumed(Vec::new());
                };
                log::info!("handoff: {} is waiting for an agent (position {})", customer.key, position);
                Dispatch::reply(customer, notices::waiting_for_agent(position))
            }
            ConversationState::ConnectedToBot => Dispatch {
                action: Action::Continue,
                outgoing: Vec::new(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelRegistry;
    use crate::intent::PhraseDetector;

    fn router() -> HandoffRouter {
        HandoffRouter::new(
            Arc::new(ConversationRegistry::new()),
            MessageBridge::new(Arc::new(ChannelRegistry::new())),
            Arc::new(PhraseDetector::new(["human"])),
        )
    }

    fn alice() -> Address {
        Address::new("web", "alice").with_name("Alice")
    }

    fn bob() -> Address {
        Address::new("telegram", "bob").with_name("Bob")
    }

    fn texts_to<'a>(d: &'a Dispatch, to: &Address) -> Vec<&'a str> {
        d.outgoing
            .iter()
            .filter(|o| o.to.key == to.key)
            .map(|o| o.text.as_str())
            .collect()
    }

    #[test]
    fn ordinary_customer_text_continues_to_bot() {
        let r = router();
        let d = r.route(&alice(), false, "reset my password");
        assert_eq!(d.action, Action::Continue);
        assert!(d.outgoing.is_empty());
        assert_eq!(
            r.registry().find_by_customer(&alice().key).unwrap().state,
            ConversationState::ConnectedToBot
        );
    }

    #[test]
    fn escalation_enqueues_once() {
        let r = router();
        let d = r.route(&alice(), false, "I want a human");
        assert_eq!(d.action, Action::Consumed);
        assert_eq!(
            texts_to(&d, &alice()),
            ["Connecting you to the next available human agent...please wait."]
        );
        let again = r.route(&alice(), false, "human please!");
        assert_eq!(again.action, Action::Consumed);
        assert!(again.outgoing.is_empty());
        assert_eq!(r.registry().pending_count(), 1);
    }

    #[test]
    fn second_escalation_reports_people_ahead() {
        let r = router();
        r.route(&alice(), false, "human");
        let carol = Address::new("web", "carol");
        let d = r.route(&carol, false, "human");
        assert_eq!(
            texts_to(&d, &carol),
            ["Connecting you to the next available human agent...please wait, there are 1."]
        );
    }

    #[test]
    fn connect_resume_cycle() {
        let r = router();
        r.route(&alice(), false, "human");

        let d = r.route(&bob(), true, "connect");
        assert_eq!(
            texts_to(&d, &bob()),
            ["You are connected to Alice\n\nType *resume* to connect the user back to bot."]
        );
        assert_eq!(texts_to(&d, &alice()), ["You are now talking to the agent: Bob"]);
        let c = r.registry().find_by_agent(&bob().key).unwrap();
        assert_eq!(c.key(), &alice().key);
        assert_eq!(c.state, ConversationState::ConnectedToAgent);

        let d = r.route(&alice(), false, "my screen is black");
        assert_eq!(d.action, Action::Consumed);
        assert_eq!(texts_to(&d, &bob()), ["my screen is black"]);

        let d = r.route(&bob(), true, "have you tried turning it on?");
        assert_eq!(texts_to(&d, &alice()), ["have you tried turning it on?"]);

        let d = r.route(&bob(), true, "Resume");
        assert_eq!(texts_to(&d, &bob()), ["Disconnected. There are 0 people waiting."]);
        assert_eq!(texts_to(&d, &alice()), ["You are now talking to the bot again."]);
        assert!(r.registry().find_by_agent(&bob().key).is_none());
        assert_eq!(
            r.registry().find_by_customer(&alice().key).unwrap().state,
            ConversationState::ConnectedToBot
        );
        assert_eq!(r.route(&alice(), false, "thanks").action, Action::Continue);
    }

    #[test]
    fn relayed_lines_carry_their_author() {
        let r = router();
        r.route(&alice(), false, "human");
        r.route(&bob(), true, "connect");
        let d = r.route(&bob(), true, "still there?");
        assert_eq!(d.outgoing.len(), 1);
        assert_eq!(d.outgoing[0].relayed_from.as_ref().map(|a| &a.key), Some(&bob().key));
        let d = r.route(&bob(), true, "resume");
        assert!(d.outgoing.iter().all(|o| o.relayed_from.is_none()));
    }

    #[tokio::test]
    async fn failed_relay_bounces_to_author() {
        // no channels registered, so every delivery fails
        let r = router();
        r.route(&alice(), false, "human");
        r.route(&bob(), true, "connect");
        let handled = r.handle(&bob(), true, "did you get this?").await;
        assert_eq!(handled.action, Action::Consumed);
        assert_eq!(handled.failures.len(), 2);
        assert_eq!(handled.failures[0].message.to.key, alice().key);
        assert_eq!(handled.failures[1].message.to.key, bob().key);
        assert_eq!(
            handled.failures[1].message.text,
            "Your message could not be delivered to Alice."
        );
    }

    #[tokio::test]
    async fn failed_notice_is_not_bounced() {
        let r = router();
        let handled = r.handle(&bob(), true, "connect").await;
        assert_eq!(handled.failures.len(), 1);
        assert_eq!(handled.failures[0].message.text, notices::NO_CUSTOMERS_WAITING);
    }

    #[test]
    fn connect_with_empty_queue() {
        let r = router();
        r.route(&alice(), false, "hello");
        let before = r.registry().list_all();
        let d = r.route(&bob(), true, "connect");
        assert_eq!(d.outgoing, vec![Outgoing::new(&bob(), "No customers waiting.")]);
        assert_eq!(r.registry().list_all(), before);
    }

    #[test]
    fn connect_while_bound_reports_conflict() {
        let r = router();
        r.route(&alice(), false, "human");
        r.route(&Address::new("web", "carol"), false, "human");
        r.route(&bob(), true, "connect");
        let d = r.route(&bob(), true, "connect");
        assert_eq!(
            texts_to(&d, &bob()),
            ["You are already connected to Alice. Type *resume* before connecting to someone else."]
        );
        assert_eq!(r.registry().pending_count(), 1);
    }

    #[test]
    fn resume_when_not_connected() {
        let r = router();
        let d = r.route(&bob(), true, "resume");
        assert_eq!(texts_to(&d, &bob()), [notices::NOT_CONNECTED]);
    }

    #[test]
    fn unbound_agent_chatter_gets_help() {
        let r = router();
        let d = r.route(&bob(), true, "hello?");
        assert_eq!(texts_to(&d, &bob()), [notices::AGENT_HELP]);
        let d = r.route(&bob(), true, "admin help");
        assert_eq!(texts_to(&d, &bob()), [notices::AGENT_HELP]);
    }

    #[test]
    fn waiting_customer_messages_are_dropped() {
        let r = router();
        r.route(&alice(), false, "human");
        let d = r.route(&alice(), false, "anyone there?");
        assert_eq!(d.action, Action::Consumed);
        assert!(d.outgoing.is_empty());
    }

    #[test]
    fn list_queue_describes_each_state() {
        let r = router();
        r.route(&alice(), false, "human");
        r.route(&Address::new("web", "carol").with_name("Carol"), false, "hi");
        let d = r.route(&bob(), true, "list queue");
        assert_eq!(
            texts_to(&d, &bob()),
            ["### Current Conversations \n - *Alice* *is waiting* to talk to an agent\n - *Carol* is talking to the bot\n"]
        );
    }

    #[test]
    fn agents_are_not_registered_as_customers() {
        let r = router();
        r.route(&bob(), true, "list queue");
        assert!(r.registry().list_all().is_empty());
        let d = r.route(&bob(), true, "list queue");
        assert_eq!(texts_to(&d, &bob()), ["No customers are in conversation."]);
    }
}
