//! Streaming tutor chat for a single checklist step.

use actix_web::{HttpResponse, web};
use futures::StreamExt;
use stepwise_core::GateResult;
use stepwise_core::domain::ChatMessage;
use stepwise_core::ports::InferenceRequest;
use stepwise_core::prompts::step_tutor_system;
use stepwise_shared::dto::StepChatRequest;

use super::CHAT_ACTION;
use super::assignments::{chat_message, owned_assignment};
use super::transcript::TranscriptSink;
use crate::middleware::auth::Identity;
use crate::middleware::error::{AppError, AppResult};
use crate::state::AppState;

/// POST /api/step-chat
///
/// Replies as a chunked `text/plain` body written fragment by fragment. The
/// exchange is saved to the step's history once the stream ends, even when
/// the client goes away early.
pub async fn step_chat(
    state: web::Data<AppState>,
    identity: Identity,
    body: web::Json<StepChatRequest>,
) -> AppResult<HttpResponse> {
    let StepChatRequest {
        assignment_id,
        step_id,
        message,
        history,
    } = body.into_inner();

    let message = message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::BadRequest("Missing required fields".to_string()));
    }

    let assignment = owned_assignment(&state, assignment_id, &identity).await?;
    let steps = state.steps.find_by_assignment_id(assignment.id).await?;
    let current = steps
        .iter()
        .find(|s| s.id == step_id)
        .ok_or_else(|| AppError::NotFound("Step not found".to_string()))?;

    let history: Vec<ChatMessage> = history.into_iter().map(chat_message).collect();
    let request = InferenceRequest::chat(
        step_tutor_system(&assignment, &steps, current),
        &history,
        &message,
        state.budgets.chat,
    );

    let caller_id = identity.caller_id();
    let sink = TranscriptSink {
        steps: state.steps.clone(),
        incidents: state.incidents.clone(),
        step_id,
        caller_id: caller_id.clone(),
        history,
        message,
    };

    let policy = state.limits.chat;
    match state
        .gate
        .handle(CHAT_ACTION, &caller_id, &policy, request, sink.into_hook())
        .await
    {
        GateResult::StreamingOk(fragments) => Ok(HttpResponse::Ok()
            .content_type("text/plain; charset=utf-8")
            .streaming(fragments.map(|f| Ok::<_, actix_web::Error>(web::Bytes::from(f))))),
        GateResult::RateLimited { retry_after } => Err(AppError::rate_limited(retry_after, &policy)),
        GateResult::UpstreamFailed { reason } => Err(AppError::UpstreamFailed(reason)),
    }
}
