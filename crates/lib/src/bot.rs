//! Bot dialog seam: answers customer messages the router passes on with `Action::Continue`.

use crate::address::Address;
use async_trait::async_trait;

#[async_trait]
pub trait BotDialog: Send + Sync {
    /// Reply for a customer message, or None to stay silent.
    async fn reply(&self, customer: &Address, text: &str) -> Option<String>;
}

pub const BOT_HELP: &str = "I'm the help desk bot and I can help you create a ticket or explore the knowledge base.\n\
You can tell me things like _I need to reset my password_ or _explore hardware articles_.\n\
If you need a person, just ask for a human.";

/// Minimal help desk bot: introduces itself on `help` and otherwise admits it did not understand.
#[derive(Debug, Default, Clone, Copy)]
pub struct HelpDeskBot;

#[async_trait]
impl BotDialog for HelpDeskBot {
    async fn reply(&self, _customer: &Address, text: &str) -> Option<String> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text.eq_ignore_ascii_case("help") {
            return Some(BOT_HELP.to_string());
        }
        Some(format!(
            "I'm sorry, I did not understand '{}'.\nType 'help' to know more about me :)",
            text
        ))
    }
}
