//! Escalation detection: decides whether a customer message asks for a human.
//!
//! The router only consults this for customers talking to the bot. Real deployments plug in an
//! NLU classifier; the phrase detector here matches configured phrases on word boundaries.

use regex::{Regex, RegexBuilder};

pub trait EscalationDetector: Send + Sync {
    fn wants_human(&self, text: &str) -> bool;
}

/// Case-insensitive whole-word phrase matcher.
pub struct PhraseDetector {
    pattern: Option<Regex>,
}

impl PhraseDetector {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let alternatives: Vec<String> = phrases
            .into_iter()
            .map(|p| p.as_ref().split_whitespace().map(regex::escape).collect::<Vec<_>>().join(r"\s+"))
            .filter(|p| !p.is_empty())
            .collect();
        if alternatives.is_empty() {
            log::warn!("escalation detector has no phrases; customers cannot ask for a human");
            return Self { pattern: None };
        }
        let source = format!(r"\b(?:{})\b", alternatives.join("|"));
        let pattern = match RegexBuilder::new(&source).case_insensitive(true).build() {
            Ok(re) => Some(re),
            Err(e) => {
                log::warn!("escalation phrases rejected: {}", e);
                None
            }
        };
        Self { pattern }
    }
}

impl EscalationDetector for PhraseDetector {
    fn wants_human(&self, text: &str) -> bool {
        self.pattern.as_ref().is_some_and(|re| re.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_phrases_case_insensitively() {
        let d = PhraseDetector::new(["human", "talk to an agent"]);
        assert!(d.wants_human("Can I speak to a HUMAN?"));
        assert!(d.wants_human("I want to talk  to an agent now"));
        assert!(!d.wants_human("humanity is doomed"));
        assert!(!d.wants_human("my agent crashed"));
    }

    #[test]
    fn phrases_are_literal() {
        let d = PhraseDetector::new(["c++ expert"]);
        assert!(d.wants_human("need a c++ expert"));
        assert!(!d.wants_human("need a cc expert"));
    }

    #[test]
    fn no_phrases_never_matches() {
        let d = PhraseDetector::new(Vec::<String>::new());
        assert!(!d.wants_human("human"));
    }
}
