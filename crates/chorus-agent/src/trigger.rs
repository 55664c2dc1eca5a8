//! Message classification
//!
//! Matching is deliberately naive: lowercase substring search for keywords,
//! and a question is either a `?` anywhere or a configured interrogative word
//! opening the message.

use regex::Regex;

use crate::config::TriggerConfig;
use crate::error::{Error, Result};
use crate::transport::InboundEvent;

/// How a message relates to one persona
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Mentions the persona or replies to it
    Targeted,
    /// On-topic (and, if required, phrased as a question)
    Spontaneous,
    Plain,
}

/// Compiled form of a [`TriggerConfig`]
#[derive(Debug, Clone)]
pub struct TriggerRules {
    keywords: Vec<String>,
    leading_question: Option<Regex>,
    require_question_mark: bool,
}

impl TriggerRules {
    pub fn new(config: &TriggerConfig) -> Result<Self> {
        let keywords = config
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let words: Vec<String> = config
            .question_words
            .iter()
            .map(|w| w.trim())
            .filter(|w| !w.is_empty())
            .map(regex::escape)
            .collect();
        let leading_question = if words.is_empty() {
            None
        } else {
            let pattern = format!(r"(?i)^\W*(?:{})\b", words.join("|"));
            Some(
                Regex::new(&pattern)
                    .map_err(|e| Error::InvalidConfig(format!("question_words: {}", e)))?,
            )
        };

        Ok(Self {
            keywords,
            leading_question,
            require_question_mark: config.require_question_mark,
        })
    }

    /// Classify `event` from the receiving persona's point of view.
    ///
    /// Agent-authored messages are classified exactly like human ones; the
    /// scheduler decides what they may cause.
    pub fn classify(&self, event: &InboundEvent) -> Trigger {
        if event.is_reply_to_self || event.is_mention {
            return Trigger::Targeted;
        }
        if self.mentions_topic(&event.text)
            && (!self.require_question_mark || self.is_question(&event.text))
        {
            return Trigger::Spontaneous;
        }
        Trigger::Plain
    }

    /// Whether any configured keyword occurs in `text`
    pub fn mentions_topic(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Whether `text` carries a question marker
    pub fn is_question(&self, text: &str) -> bool {
        text.contains('?')
            || self
                .leading_question
                .as_ref()
                .is_some_and(|re| re.is_match(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules(require_question_mark: bool) -> TriggerRules {
        TriggerRules::new(&TriggerConfig {
            keywords: vec!["chess".into(), "Endgame".into(), "free spin".into()],
            question_words: vec!["how".into(), "anyone".into()],
            require_question_mark,
        })
        .unwrap()
    }

    fn event(text: &str) -> InboundEvent {
        InboundEvent::new(1, "user-1", text)
    }

    #[test]
    fn test_targeted_wins() {
        let rules = rules(true);
        let mut mention = event("hello there");
        mention.is_mention = true;
        assert_eq!(rules.classify(&mention), Trigger::Targeted);

        let mut reply = event("chess?");
        reply.is_reply_to_self = true;
        assert_eq!(rules.classify(&reply), Trigger::Targeted);
    }

    #[test]
    fn test_keyword_and_question_mark() {
        let rules = rules(true);
        assert_eq!(rules.classify(&event("any CHESS clubs here?")), Trigger::Spontaneous);
        assert_eq!(rules.classify(&event("I like chess")), Trigger::Plain);
        assert_eq!(rules.classify(&event("is it raining?")), Trigger::Plain);
    }

    #[test]
    fn test_leading_question_word() {
        let rules = rules(true);
        assert_eq!(
            rules.classify(&event("How do you study the endgame")),
            Trigger::Spontaneous
        );
        assert_eq!(
            rules.classify(&event("Anyone up for chess")),
            Trigger::Spontaneous
        );
        // only counts when it opens the message
        assert_eq!(rules.classify(&event("chess is how I relax")), Trigger::Plain);
        // whole word only
        assert_eq!(rules.classify(&event("Howdy, chess fans")), Trigger::Plain);
    }

    #[test]
    fn test_question_not_required() {
        let rules = rules(false);
        assert_eq!(rules.classify(&event("I like chess")), Trigger::Spontaneous);
        assert_eq!(rules.classify(&event("I like tennis")), Trigger::Plain);
    }

    #[test]
    fn test_multi_word_keyword_substring() {
        let rules = rules(false);
        assert!(rules.mentions_topic("got a FREE SPIN today"));
        assert!(!rules.mentions_topic("free to spin"));
    }

    #[test]
    fn test_agent_authored_classified_the_same() {
        let rules = rules(true);
        let mut from_bot = event("chess anyone?");
        from_bot.sender_is_bot = true;
        assert_eq!(rules.classify(&from_bot), Trigger::Spontaneous);
    }

    #[test]
    fn test_empty_config_never_spontaneous() {
        let rules = TriggerRules::new(&TriggerConfig {
            keywords: vec![],
            question_words: vec![],
            require_question_mark: true,
        })
        .unwrap();
        assert_eq!(rules.classify(&event("what?")), Trigger::Plain);
        assert!(rules.is_question("what?"));
        assert!(!rules.is_question("what"));
    }
}
