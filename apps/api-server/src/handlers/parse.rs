//! Checklist extraction from an uploaded PDF.

use actix_web::{HttpResponse, web};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use stepwise_core::checklist::{ChecklistError, parse_checklist};
use stepwise_core::ports::{Incident, InferenceRequest};
use stepwise_core::prompts;

use super::PARSE_ACTION;
use super::assignments::store_checklist;
use crate::middleware::auth::Identity;
use crate::middleware::error::{AppError, AppResult};
use crate::state::AppState;

const PDF_MEDIA_TYPE: &str = "application/pdf";

/// POST /api/parse-assignment
///
/// The body is the raw PDF. An admitted upload costs one unit of the daily
/// budget even when the document turns out not to be an assignment.
pub async fn parse_assignment(
    state: web::Data<AppState>,
    identity: Identity,
    body: web::Bytes,
) -> AppResult<HttpResponse> {
    if body.is_empty() {
        return Err(AppError::BadRequest("No PDF file provided".to_string()));
    }

    let caller_id = identity.caller_id();
    let policy = state.limits.parse;
    let request = InferenceRequest::document(
        PDF_MEDIA_TYPE,
        STANDARD.encode(&body),
        prompts::checklist_instructions(),
        state.budgets.parse,
    );

    let answer = state
        .gate
        .complete(PARSE_ACTION, &caller_id, &policy, &request)
        .await
        .map_err(|e| AppError::from_gate(e, &policy))?;

    let checklist = match parse_checklist(&answer) {
        Ok(checklist) => checklist,
        Err(ChecklistError::NotAnAssignment(reason)) => {
            tracing::info!(caller_id = %caller_id, reason = %reason, "Upload is not an assignment");
            return Err(AppError::BadRequest(reason));
        }
        Err(ChecklistError::Malformed(error)) => {
            state.incidents.report(Incident::MalformedOutput {
                action: PARSE_ACTION.to_string(),
                caller_id,
                error: error.clone(),
            });
            return Err(AppError::UnprocessableResult(error));
        }
    };

    let saved = store_checklist(
        &state,
        identity.user_id,
        checklist.title,
        answer,
        checklist.steps,
    )
    .await?;

    Ok(HttpResponse::Ok().json(saved))
}
