//! Persists a step chat once its stream has ended.

use std::sync::Arc;

use futures::FutureExt;
use stepwise_core::domain::{ChatMessage, extend_transcript};
use stepwise_core::ports::{Incident, IncidentReporter, StepRepository};
use stepwise_core::{CompletionHook, StreamOutcome};
use uuid::Uuid;

use super::CHAT_ACTION;

/// Everything needed to append one exchange to a step's chat history.
pub struct TranscriptSink {
    pub steps: Arc<dyn StepRepository>,
    pub incidents: Arc<dyn IncidentReporter>,
    pub step_id: Uuid,
    pub caller_id: String,
    pub history: Vec<ChatMessage>,
    pub message: String,
}

impl TranscriptSink {
    /// Completion hook storing `history + user message + assistant reply`.
    ///
    /// An aborted stream stores whatever partial reply arrived; with nothing
    /// received the history is left untouched.
    pub fn into_hook(self) -> CompletionHook {
        Box::new(move |outcome: StreamOutcome| {
            async move {
                let reply = outcome.text();
                if reply.is_empty() && matches!(outcome, StreamOutcome::Aborted { .. }) {
                    tracing::debug!(step_id = %self.step_id, "No reply to persist");
                    return;
                }

                let transcript = extend_transcript(&self.history, &self.message, reply);
                match self.steps.set_chat_history(self.step_id, transcript).await {
                    Ok(()) => tracing::debug!(step_id = %self.step_id, "Chat history saved"),
                    Err(e) => self.incidents.report(Incident::PersistenceFailed {
                        action: CHAT_ACTION.to_string(),
                        caller_id: self.caller_id.clone(),
                        error: e.to_string(),
                    }),
                }
            }
            .boxed()
        })
    }
}
