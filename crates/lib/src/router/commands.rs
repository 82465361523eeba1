//! Agent command table: case-insensitive prefix patterns, checked in priority order.

use regex::{Regex, RegexBuilder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    AdminHelp,
    ListQueue,
    Connect,
    Resume,
}

const PATTERNS: &[(&str, AgentCommand)] = &[
    ("^admin help", AgentCommand::AdminHelp),
    ("^list queue", AgentCommand::ListQueue),
    ("^connect", AgentCommand::Connect),
    ("^resume", AgentCommand::Resume),
];

pub struct CommandTable {
    entries: Vec<(Regex, AgentCommand)>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandTable {
    pub fn new() -> Self {
        let entries = PATTERNS
            .iter()
            .map(|(pattern, command)| {
                let re = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .expect("command patterns are valid");
                (re, *command)
            })
            .collect();
        Self { entries }
    }

    /// First command whose pattern matches the raw text (no trimming).
    pub fn classify(&self, text: &str) -> Option<AgentCommand> {
        self.entries
            .iter()
            .find(|(re, _)| re.is_match(text))
            .map(|(_, command)| *command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitive_prefix() {
        let table = CommandTable::new();
        assert_eq!(table.classify("ADMIN HELP"), Some(AgentCommand::AdminHelp));
        assert_eq!(table.classify("List Queue please"), Some(AgentCommand::ListQueue));
        assert_eq!(table.classify("connect"), Some(AgentCommand::Connect));
        assert_eq!(table.classify("Connected?"), Some(AgentCommand::Connect));
        assert_eq!(table.classify("resume"), Some(AgentCommand::Resume));
    }

    #[test]
    fn prefix_only() {
        let table = CommandTable::new();
        assert_eq!(table.classify("please connect"), None);
        assert_eq!(table.classify(" connect"), None);
        assert_eq!(table.classify("help"), None);
        assert_eq!(table.classify(""), None);
    }
}
