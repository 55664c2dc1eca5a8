//! OpenAI-compatible Chat Completions provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::ChatModel;
use crate::{
    error::{Error, Result},
    stream::{CompletionEvent, CompletionStream, collect_text},
    types::{CompletionOptions, Message, Usage},
};

/// Default endpoint for the hosted OpenAI API
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// Prefixes of stream error messages that map back to typed errors
const RATE_LIMITED: &str = "rate limited";
const UNAUTHORIZED: &str = "invalid API key";
const API_ERROR: &str = "api error ";

/// Client for any server speaking the Chat Completions protocol
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl OpenAIProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Point the provider at another compatible server (Groq, OpenRouter, Ollama, ...)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Stream a completion
    pub fn stream(
        &self,
        messages: &[Message],
        options: &CompletionOptions,
    ) -> Result<CompletionStream> {
        let request = build_request(messages, options);
        let url = format!("{}/chat/completions", self.base_url);

        let request_builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, options.model.clone())))
    }
}

#[async_trait]
impl ChatModel for OpenAIProvider {
    async fn complete(&self, messages: &[Message], options: &CompletionOptions) -> Result<String> {
        let stream = self.stream(messages, options)?;
        let (text, usage) = collect_text(stream).await.map_err(refine_error)?;
        tracing::debug!(
            model = %options.model,
            input_tokens = usage.input,
            output_tokens = usage.output,
            "completion finished"
        );
        Ok(text)
    }
}

fn build_request(messages: &[Message], options: &CompletionOptions) -> OpenAIRequest {
    OpenAIRequest {
        model: options.model.clone(),
        messages: messages
            .iter()
            .map(|m| OpenAIMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect(),
        stream: true,
        max_tokens: options.max_tokens,
        temperature: options.temperature,
    }
}

/// Map an event-source failure to a message carrying the HTTP status when known
fn describe_sse_error(error: reqwest_eventsource::Error) -> String {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, _) => match status {
            StatusCode::TOO_MANY_REQUESTS => format!("{} ({})", RATE_LIMITED, status),
            StatusCode::UNAUTHORIZED => format!("{} ({})", UNAUTHORIZED, status),
            _ => format!("Invalid status code: {}", status),
        },
        other => format!("SSE error: {}", other),
    }
}

/// Turn a stream error message back into the typed error it describes
fn refine_error(error: Error) -> Error {
    let Error::Sse(message) = error else {
        return error;
    };
    if message.starts_with(RATE_LIMITED) {
        return Error::RateLimited { retry_after: None };
    }
    if message.starts_with(UNAUTHORIZED) {
        return Error::InvalidApiKey;
    }
    if let Some(rest) = message.strip_prefix(API_ERROR) {
        let (error_type, detail) = rest.split_once(": ").unwrap_or(("unknown", rest));
        return Error::api(error_type, detail);
    }
    Error::Sse(message)
}

fn create_stream(
    mut event_source: EventSource,
    model: String,
) -> impl futures::Stream<Item = CompletionEvent> {
    stream! {
        let mut usage = Usage::default();

        yield CompletionEvent::Start { model };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    match serde_json::from_str::<StreamChunk>(&msg.data) {
                        Ok(chunk) => {
                            for choice in &chunk.choices {
                                if let Some(ref content) = choice.delta.content {
                                    yield CompletionEvent::TextDelta { delta: content.clone() };
                                }
                            }

                            if let Some(ref stream_usage) = chunk.usage {
                                usage.input = stream_usage.prompt_tokens;
                                usage.output = stream_usage.completion_tokens;
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            // some servers report failures inside the stream
                            let message = match serde_json::from_str::<ErrorEnvelope>(&msg.data) {
                                Ok(envelope) => format!(
                                    "{}{}: {}",
                                    API_ERROR,
                                    envelope.error.error_type.unwrap_or_else(|| "unknown".to_string()),
                                    envelope.error.message
                                ),
                                Err(_) => format!("Failed to parse chunk: {}", e),
                            };
                            yield CompletionEvent::Error { message };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield CompletionEvent::Error { message: describe_sse_error(e) };
                    return;
                }
            }
        }

        event_source.close();
        yield CompletionEvent::Done { usage };
    }
}

// Request/Response types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_roles_and_sampling() {
        let messages = vec![Message::system("persona"), Message::user("hi")];
        let options = CompletionOptions::new("gpt-4o-mini")
            .with_max_tokens(70)
            .with_temperature(0.9);
        let json = serde_json::to_value(build_request(&messages, &options)).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["stream"], true);
        assert_eq!(json["max_tokens"], 70);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_request_omits_unset_sampling() {
        let options = CompletionOptions::new("m");
        let json = serde_json::to_value(build_request(&[], &options)).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_chunk_parsing() {
        let data = r#"{"choices":[{"delta":{"content":"yo"},"finish_reason":null}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("yo"));
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_refine_stream_errors() {
        let limited = refine_error(Error::Sse("rate limited (429 Too Many Requests)".into()));
        assert!(matches!(limited, Error::RateLimited { retry_after: None }));
        assert!(limited.is_quota());

        let auth = refine_error(Error::Sse("invalid API key (401 Unauthorized)".into()));
        assert!(matches!(auth, Error::InvalidApiKey));

        let api = refine_error(Error::Sse("api error insufficient_quota: out of credit".into()));
        assert!(matches!(&api, Error::Api { error_type, .. } if error_type == "insufficient_quota"));
        assert!(api.is_quota());

        assert!(matches!(
            refine_error(Error::EmptyCompletion),
            Error::EmptyCompletion
        ));
    }

    #[test]
    fn test_error_envelope_parsing() {
        let data = r#"{"error":{"message":"model overloaded","type":"server_error"}}"#;
        assert!(serde_json::from_str::<StreamChunk>(data).is_err());
        let envelope: ErrorEnvelope = serde_json::from_str(data).unwrap();
        assert_eq!(envelope.error.error_type.as_deref(), Some("server_error"));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let provider = OpenAIProvider::new("k").with_base_url("http://localhost:11434/v1/");
        assert_eq!(provider.base_url(), "http://localhost:11434/v1");
    }
}
