//! Agent directory: the allow-list that decides which addresses may issue handoff commands.

use crate::address::AddressKey;
use std::collections::HashSet;

#[derive(Debug, Default, Clone)]
pub struct AgentDirectory {
    agents: HashSet<AddressKey>,
}

impl AgentDirectory {
    pub fn new(agents: impl IntoIterator<Item = AddressKey>) -> Self {
        Self {
            agents: agents.into_iter().collect(),
        }
    }

    /// Build from `<channel>:<conversation>` entries; malformed entries are skipped with a warning.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Self {
        Self::new(entries.iter().filter_map(|e| {
            let parsed = AddressKey::parse(e.as_ref());
            if parsed.is_none() {
                log::warn!("ignoring agent entry {:?}: expected <channel>:<conversation>", e.as_ref());
            }
            parsed
        }))
    }

    pub fn is_agent(&self, address: &AddressKey) -> bool {
        self.agents.contains(address)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_entries_skips_malformed() {
        let dir = AgentDirectory::from_entries(&["telegram:42", "nonsense", "web:desk-1"]);
        assert_eq!(dir.len(), 2);
        assert!(dir.is_agent(&AddressKey::new("telegram", "42")));
        assert!(dir.is_agent(&AddressKey::new("web", "desk-1")));
        assert!(!dir.is_agent(&AddressKey::new("web", "42")));
    }

    #[test]
    fn new_deduplicates() {
        let dir = AgentDirectory::new([AddressKey::new("web", "a"), AddressKey::new("web", "a")]);
        assert_eq!(dir.len(), 1);
        assert!(!AgentDirectory::default().is_agent(&AddressKey::new("web", "a")));
        assert!(AgentDirectory::default().is_empty());
    }
}
