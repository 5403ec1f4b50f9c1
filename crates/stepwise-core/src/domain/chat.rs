use serde::{Deserialize, Serialize};

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered chat history. Role alternation is not enforced.
pub type ChatTranscript = Vec<ChatMessage>;

/// Append one exchange to `history`, returning the new transcript.
pub fn extend_transcript(
    history: &[ChatMessage],
    user_message: &str,
    assistant_reply: &str,
) -> ChatTranscript {
    let mut transcript = Vec::with_capacity(history.len() + 2);
    transcript.extend_from_slice(history);
    transcript.push(ChatMessage::user(user_message));
    transcript.push(ChatMessage::assistant(assistant_reply));
    transcript
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn extend_appends_user_then_assistant() {
        let history = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let out = extend_transcript(&history, "c", "d");
        assert_eq!(out.len(), 4);
        assert_eq!(out[2], ChatMessage::user("c"));
        assert_eq!(out[3], ChatMessage::assistant("d"));
        assert_eq!(history.len(), 2);
    }
}
