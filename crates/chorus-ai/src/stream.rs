//! Streaming event types and utilities

use crate::error::{Error, Result};
use crate::types::Usage;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a completion streams in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// The provider accepted the request
    Start { model: String },
    /// Text content delta
    TextDelta { delta: String },
    /// Completion finished
    Done { usage: Usage },
    /// Error occurred
    Error { message: String },
}

impl CompletionEvent {
    /// Check if this is a terminal event (Done or Error)
    pub fn is_terminal(&self) -> bool {
        matches!(self, CompletionEvent::Done { .. } | CompletionEvent::Error { .. })
    }
}

/// A stream of completion events
pub type CompletionStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

/// Accumulates streamed deltas into the final reply text
#[derive(Debug, Default)]
pub struct TextCollector {
    text: String,
    usage: Usage,
    error: Option<String>,
    done: bool,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a streaming event
    pub fn process_event(&mut self, event: &CompletionEvent) {
        match event {
            CompletionEvent::TextDelta { delta } => self.text.push_str(delta),
            CompletionEvent::Done { usage } => {
                self.usage = *usage;
                self.done = true;
            }
            CompletionEvent::Error { message } => self.error = Some(message.clone()),
            CompletionEvent::Start { .. } => {}
        }
    }

    /// Finish collecting. Errors, truncated streams and blank replies all fail.
    pub fn finish(self) -> Result<(String, Usage)> {
        if let Some(message) = self.error {
            return Err(Error::Sse(message));
        }
        if !self.done {
            return Err(Error::UnexpectedResponse(
                "stream ended before completion finished".to_string(),
            ));
        }
        let text = self.text.trim().to_string();
        if text.is_empty() {
            return Err(Error::EmptyCompletion);
        }
        Ok((text, self.usage))
    }
}

/// Drain a completion stream into its final text and usage
pub async fn collect_text(mut stream: CompletionStream) -> Result<(String, Usage)> {
    let mut collector = TextCollector::new();
    while let Some(event) = stream.next().await {
        let terminal = event.is_terminal();
        collector.process_event(&event);
        if terminal {
            break;
        }
    }
    collector.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(events: Vec<CompletionEvent>) -> CompletionStream {
        Box::pin(tokio_stream::iter(events))
    }

    #[tokio::test]
    async fn test_collects_deltas() {
        let stream = stream_of(vec![
            CompletionEvent::Start { model: "m".into() },
            CompletionEvent::TextDelta { delta: "hello ".into() },
            CompletionEvent::TextDelta { delta: "there".into() },
            CompletionEvent::Done {
                usage: Usage { input: 12, output: 2 },
            },
        ]);
        let (text, usage) = collect_text(stream).await.unwrap();
        assert_eq!(text, "hello there");
        assert_eq!(usage.output, 2);
    }

    #[tokio::test]
    async fn test_error_event_fails() {
        let stream = stream_of(vec![
            CompletionEvent::TextDelta { delta: "partial".into() },
            CompletionEvent::Error {
                message: "connection reset".into(),
            },
        ]);
        let err = collect_text(stream).await.unwrap_err();
        assert!(matches!(err, Error::Sse(ref m) if m == "connection reset"));
    }

    #[tokio::test]
    async fn test_truncated_stream_fails() {
        let stream = stream_of(vec![CompletionEvent::TextDelta { delta: "cut".into() }]);
        assert!(matches!(
            collect_text(stream).await,
            Err(Error::UnexpectedResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_blank_completion_fails() {
        let stream = stream_of(vec![
            CompletionEvent::TextDelta { delta: "  \n".into() },
            CompletionEvent::Done {
                usage: Usage::default(),
            },
        ]);
        assert!(matches!(
            collect_text(stream).await,
            Err(Error::EmptyCompletion)
        ));
    }
}
