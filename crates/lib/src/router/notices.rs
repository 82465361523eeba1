//! User-visible texts sent by the router.

use crate::conversation::{Conversation, ConversationState};

pub const AGENT_HELP: &str = "### Agent Help, please type ...\n \
- *list queue* to list users waiting for assistance.\n \
- *connect* to connect to customer who has been waiting longest.\n \
- *resume* to connect the customer you are talking to back to the bot.\n \
- *admin help* at any time to see these options again.\n";

pub const NO_CUSTOMERS_WAITING: &str = "No customers waiting.";
pub const NOT_CONNECTED: &str = "You are not connected to anyone. Type *connect* to talk to the next waiting customer.";
pub const BACK_TO_BOT: &str = "You are now talking to the bot again.";
pub const NO_CONVERSATIONS: &str = "No customers are in conversation.";

/// `position` is the customer's place in the queue, 1 for the head.
pub fn waiting_for_agent(position: usize) -> String {
    let ahead = if position > 1 {
        format!(", there are {}", position - 1)
    } else {
        String::new()
    };
    format!("Connecting you to the next available human agent...please wait{}.", ahead)
}

pub fn undelivered(recipient: &str) -> String {
    format!("Your message could not be delivered to {}.", recipient)
}

pub fn agent_connected(customer_name: &str) -> String {
    format!(
        "You are connected to {}\n\nType *resume* to connect the user back to bot.",
        customer_name
    )
}

pub fn customer_connected(agent_name: &str) -> String {
    format!("You are now talking to the agent: {}", agent_name)
}

pub fn already_connected(customer_name: &str) -> String {
    format!(
        "You are already connected to {}. Type *resume* before connecting to someone else.",
        customer_name
    )
}

pub fn disconnected(pending: usize) -> String {
    format!("Disconnected. There are {} people waiting.", pending)
}

/// Render the "list queue" reply, one line per conversation.
pub fn current_conversations(conversations: &[Conversation]) -> String {
    if conversations.is_empty() {
        return NO_CONVERSATIONS.to_string();
    }
    let mut text = String::from("### Current Conversations \n");
    for c in conversations {
        text.push_str(" - *");
        text.push_str(c.customer_name());
        text.push('*');
        text.push_str(match c.state {
            ConversationState::ConnectedToBot => " is talking to the bot\n",
            ConversationState::ConnectedToAgent => " is talking to an agent\n",
            ConversationState::WaitingForAgent => " *is waiting* to talk to an agent\n",
        });
    }
    text
}
