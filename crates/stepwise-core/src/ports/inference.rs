//! Inference provider port - a streaming text-generation endpoint.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::{ChatMessage, ChatRole};

/// Live sequence of text fragments, ending when the provider signals completion.
pub type FragmentStream = BoxStream<'static, Result<String, InferenceError>>;

/// A piece of prompt content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptContent {
    Text(String),
    /// Base64-encoded document forwarded to the provider as-is.
    Document { media_type: String, data: String },
}

/// One turn of the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptMessage {
    pub role: ChatRole,
    pub content: Vec<PromptContent>,
}

impl From<&ChatMessage> for PromptMessage {
    fn from(message: &ChatMessage) -> Self {
        Self {
            role: message.role,
            content: vec![PromptContent::Text(message.content.clone())],
        }
    }
}

/// `{systemContext, promptOrMessages, maxOutputSize}` for one provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub system: Option<String>,
    pub messages: Vec<PromptMessage>,
    pub max_tokens: u32,
}

impl InferenceRequest {
    /// Prior transcript followed by a new user turn.
    pub fn chat(
        system: impl Into<String>,
        history: &[ChatMessage],
        message: &str,
        max_tokens: u32,
    ) -> Self {
        let mut messages: Vec<PromptMessage> = history.iter().map(PromptMessage::from).collect();
        messages.push(PromptMessage::from(&ChatMessage::user(message)));

        Self {
            system: Some(system.into()),
            messages,
            max_tokens,
        }
    }

    /// A single user turn with a document followed by instructions.
    pub fn document(
        media_type: impl Into<String>,
        data: impl Into<String>,
        instructions: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            system: None,
            messages: vec![PromptMessage {
                role: ChatRole::User,
                content: vec![
                    PromptContent::Document {
                        media_type: media_type.into(),
                        data: data.into(),
                    },
                    PromptContent::Text(instructions.into()),
                ],
            }],
            max_tokens,
        }
    }
}

/// Provider trait - abstraction over text-generation backends.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Run the request to completion and return the generated text.
    async fn complete(&self, request: &InferenceRequest) -> Result<String, InferenceError>;

    /// Open a streaming call. Dropping the returned stream closes the upstream.
    async fn stream(&self, request: &InferenceRequest) -> Result<FragmentStream, InferenceError>;
}

/// Provider errors, normalized away from the transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InferenceError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Provider returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider error ({kind}): {message}")]
    Provider { kind: String, message: String },

    #[error("Stream interrupted: {0}")]
    Stream(String),

    #[error("Unexpected provider response: {0}")]
    Decode(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_appends_new_user_turn() {
        let history = vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")];
        let request = InferenceRequest::chat("be brief", &history, "next?", 2048);

        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].role, ChatRole::User);
        assert_eq!(
            request.messages[2].content,
            vec![PromptContent::Text("next?".to_string())]
        );
    }
}
