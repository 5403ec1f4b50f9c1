//! Anthropic Messages API provider.
//!
//! `complete` posts a regular request and returns the first text block.
//! `stream` opens a server-sent-events request and yields every
//! `content_block_delta` / `text_delta` as a fragment until `message_stop`.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource, RequestBuilderExt};
use serde::{Deserialize, Serialize};

use stepwise_core::domain::ChatRole;
use stepwise_core::ports::{
    FragmentStream, InferenceError, InferenceProvider, InferenceRequest, PromptContent,
};

const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub connect_timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.anthropic.com".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl AnthropicConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let api_key = std::env::var("ANTHROPIC_API_KEY").unwrap_or_default();
        if api_key.is_empty() {
            tracing::warn!("ANTHROPIC_API_KEY not set. Inference requests will be rejected upstream.");
        }

        Self {
            api_key,
            base_url: std::env::var("ANTHROPIC_BASE_URL").unwrap_or(defaults.base_url),
            model: std::env::var("ANTHROPIC_MODEL").unwrap_or(defaults.model),
            connect_timeout: defaults.connect_timeout,
        }
    }
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> Result<Self, InferenceError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn request(&self, request: &InferenceRequest, stream: bool) -> reqwest::RequestBuilder {
        let url = format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'));
        self.client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&MessagesBody::new(&self.config.model, request, stream))
    }
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: ChatRole,
    content: Vec<WireContent<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireContent<'a> {
    Text { text: &'a str },
    Document { source: DocumentSource<'a> },
}

#[derive(Serialize)]
struct DocumentSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

impl<'a> MessagesBody<'a> {
    fn new(model: &'a str, request: &'a InferenceRequest, stream: bool) -> Self {
        let messages = request
            .messages
            .iter()
            .map(|m| WireMessage {
                role: m.role,
                content: m
                    .content
                    .iter()
                    .map(|c| match c {
                        PromptContent::Text(text) => WireContent::Text { text },
                        PromptContent::Document { media_type, data } => WireContent::Document {
                            source: DocumentSource {
                                kind: "base64",
                                media_type,
                                data,
                            },
                        },
                    })
                    .collect(),
            })
            .collect();

        Self {
            model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            messages,
            stream,
        }
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent {
    ContentBlockDelta {
        delta: Delta,
    },
    MessageStop,
    Error {
        error: ApiError,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Delta {
    TextDelta {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Decoded {
    Fragment(String),
    Stop,
}

/// Interpret one SSE payload. `None` for events that carry no text.
fn decode_event(data: &str) -> Result<Option<Decoded>, InferenceError> {
    let event: StreamEvent =
        serde_json::from_str(data).map_err(|e| InferenceError::Decode(e.to_string()))?;

    match event {
        StreamEvent::ContentBlockDelta {
            delta: Delta::TextDelta { text },
        } => Ok(Some(Decoded::Fragment(text))),
        StreamEvent::MessageStop => Ok(Some(Decoded::Stop)),
        StreamEvent::Error { error } => Err(InferenceError::Provider {
            kind: error.kind,
            message: error.message,
        }),
        StreamEvent::ContentBlockDelta { .. } | StreamEvent::Other => Ok(None),
    }
}

async fn open_error(error: reqwest_eventsource::Error) -> InferenceError {
    match error {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => InferenceError::Status {
            status: status.as_u16(),
            body: response.text().await.unwrap_or_default(),
        },
        reqwest_eventsource::Error::InvalidContentType(content_type, _) => InferenceError::Decode(
            format!("unexpected content type {content_type:?}"),
        ),
        other => InferenceError::Request(other.to_string()),
    }
}

fn fragments(mut source: EventSource) -> FragmentStream {
    let stream = async_stream::stream! {
        loop {
            match source.next().await {
                Some(Ok(Event::Open)) => continue,
                Some(Ok(Event::Message(message))) => match decode_event(&message.data) {
                    Ok(Some(Decoded::Fragment(text))) => yield Ok(text),
                    Ok(Some(Decoded::Stop)) => break,
                    Ok(None) => continue,
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                },
                Some(Err(reqwest_eventsource::Error::StreamEnded)) | None => {
                    yield Err(InferenceError::Stream(
                        "connection closed before message_stop".to_string(),
                    ));
                    break;
                }
                Some(Err(e)) => {
                    yield Err(InferenceError::Stream(e.to_string()));
                    break;
                }
            }
        }
        source.close();
    };
    stream.boxed()
}

#[async_trait]
impl InferenceProvider for AnthropicProvider {
    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let response = self
            .request(request, false)
            .send()
            .await
            .map_err(|e| InferenceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: MessagesResponse = response
            .json()
            .await
            .map_err(|e| InferenceError::Decode(e.to_string()))?;

        body.content
            .into_iter()
            .find_map(|block| match block {
                ResponseBlock::Text { text } => Some(text),
                ResponseBlock::Other => None,
            })
            .ok_or_else(|| InferenceError::Decode("response has no text content".to_string()))
    }

    async fn stream(&self, request: &InferenceRequest) -> Result<FragmentStream, InferenceError> {
        let mut source = self
            .request(request, true)
            .eventsource()
            .map_err(|e| InferenceError::Request(e.to_string()))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        // Wait for the response headers so open failures surface here rather
        // than as the first stream item.
        match source.next().await {
            Some(Ok(Event::Open)) => {
                tracing::debug!(model = %self.config.model, "Inference stream opened");
                Ok(fragments(source))
            }
            Some(Ok(Event::Message(_))) => {
                source.close();
                Err(InferenceError::Decode("message before open".to_string()))
            }
            Some(Err(e)) => {
                source.close();
                Err(open_error(e).await)
            }
            None => Err(InferenceError::Stream("closed before open".to_string())),
        }
    }
}
