//! Canned model for running without an API key

use async_trait::async_trait;
use chorus_ai::{ChatModel, CompletionOptions, Message, Result, Role};
use std::sync::atomic::{AtomicUsize, Ordering};

const LINES: &[&str] = &[
    "Interesting point.",
    "I see it a little differently, but fair enough.",
    "Good question, I was wondering the same.",
    "Agreed, that matches my experience.",
    "Hard to say, it depends on the situation.",
];

/// Cycles through a few neutral lines, quoting the prompt's opening words
#[derive(Default)]
pub struct OfflineModel {
    calls: AtomicUsize,
}

impl OfflineModel {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatModel for OfflineModel {
    async fn complete(&self, messages: &[Message], _options: &CompletionOptions) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::Relaxed);
        let line = LINES[n % LINES.len()];
        let topic = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.split_whitespace().take(6).collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        if topic.is_empty() {
            Ok(line.to_string())
        } else {
            Ok(format!("{} (re: {})", line, topic))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cycles_and_quotes() {
        let model = OfflineModel::new();
        let options = CompletionOptions::new("offline");
        let messages = vec![Message::system("sys"), Message::user("what is a good first move")];

        let first = model.complete(&messages, &options).await.unwrap();
        assert_eq!(first, "Interesting point. (re: what is a good first move)");
        let second = model.complete(&messages[..1], &options).await.unwrap();
        assert_eq!(second, LINES[1]);
    }
}
