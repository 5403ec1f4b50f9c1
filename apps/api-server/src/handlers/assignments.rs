//! Assignment and checklist step endpoints.

use actix_web::{HttpResponse, web};
use stepwise_core::domain::{Assignment, ChatMessage, ChatRole, ChecklistStep, StepDraft};
use stepwise_shared::dto::{
    AssignmentResponse, ChatTurn, Role, SaveAssignmentRequest, SavedAssignmentResponse,
    StepDraftDto, StepResponse, UpdateStepRequest,
};
use uuid::Uuid;

use crate::middleware::auth::Identity;
use crate::middleware::error::{AppError, AppResult};
use crate::state::AppState;

pub(super) fn chat_turn(message: &ChatMessage) -> ChatTurn {
    ChatTurn {
        role: match message.role {
            ChatRole::User => Role::User,
            ChatRole::Assistant => Role::Assistant,
        },
        content: message.content.clone(),
    }
}

pub(super) fn chat_message(turn: ChatTurn) -> ChatMessage {
    ChatMessage {
        role: match turn.role {
            Role::User => ChatRole::User,
            Role::Assistant => ChatRole::Assistant,
        },
        content: turn.content,
    }
}

fn step_response(step: ChecklistStep) -> StepResponse {
    StepResponse {
        id: step.id,
        assignment_id: step.assignment_id,
        step_number: step.step_number,
        title: step.title,
        description: step.description,
        completed: step.completed,
        chat_history: step.chat_history.iter().map(chat_turn).collect(),
        created_at: step.created_at,
    }
}

fn assignment_response(assignment: Assignment, steps: Vec<ChecklistStep>) -> AssignmentResponse {
    let completed_count = steps.iter().filter(|s| s.completed).count();
    let total_steps = steps.len();

    AssignmentResponse {
        id: assignment.id,
        user_id: assignment.user_id,
        title: assignment.title,
        original_text: assignment.original_text,
        created_at: assignment.created_at,
        steps: steps.into_iter().map(step_response).collect(),
        completed_count,
        total_steps,
    }
}

/// Load an assignment the caller owns. Someone else's assignment is reported
/// as missing.
pub(super) async fn owned_assignment(
    state: &AppState,
    id: Uuid,
    identity: &Identity,
) -> AppResult<Assignment> {
    state
        .assignments
        .find_by_id(id)
        .await?
        .filter(|a| a.is_owned_by(identity.user_id))
        .ok_or_else(|| AppError::NotFound("Assignment not found".to_string()))
}

/// Store an assignment with its steps numbered from 1.
pub(super) async fn store_checklist(
    state: &AppState,
    user_id: Uuid,
    title: String,
    original_text: String,
    drafts: Vec<StepDraft>,
) -> AppResult<SavedAssignmentResponse> {
    let assignment = state
        .assignments
        .insert(Assignment::new(user_id, title, original_text))
        .await?;

    let steps = state
        .steps
        .insert_many(ChecklistStep::numbered(assignment.id, drafts))
        .await?;

    tracing::info!(assignment_id = %assignment.id, steps = steps.len(), "Assignment saved");

    Ok(SavedAssignmentResponse {
        id: assignment.id,
        title: assignment.title,
        steps: steps
            .into_iter()
            .map(|s| StepDraftDto {
                title: s.title,
                description: s.description,
            })
            .collect(),
    })
}

/// POST /api/save-assignment
pub async fn save_assignment(
    state: web::Data<AppState>,
    identity: Identity,
    body: web::Json<SaveAssignmentRequest>,
) -> AppResult<HttpResponse> {
    let SaveAssignmentRequest {
        title,
        steps,
        original_text,
    } = body.into_inner();

    let title = title.trim().to_string();
    if title.is_empty() || steps.is_empty() {
        return Err(AppError::BadRequest("Missing required fields".to_string()));
    }

    let drafts = steps
        .into_iter()
        .map(|s| StepDraft {
            title: s.title,
            description: s.description,
        })
        .collect();

    let saved = store_checklist(&state, identity.user_id, title, original_text, drafts).await?;
    Ok(HttpResponse::Ok().json(saved))
}

/// GET /api/assignments
pub async fn list_assignments(
    state: web::Data<AppState>,
    identity: Identity,
) -> AppResult<HttpResponse> {
    let assignments = state.assignments.find_by_user_id(identity.user_id).await?;

    let mut response = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let steps = state.steps.find_by_assignment_id(assignment.id).await?;
        response.push(assignment_response(assignment, steps));
    }

    Ok(HttpResponse::Ok().json(response))
}

/// GET /api/assignments/{id}
pub async fn get_assignment(
    state: web::Data<AppState>,
    identity: Identity,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let assignment = owned_assignment(&state, path.into_inner(), &identity).await?;
    let steps = state.steps.find_by_assignment_id(assignment.id).await?;

    Ok(HttpResponse::Ok().json(assignment_response(assignment, steps)))
}

/// PATCH /api/steps/{id}
pub async fn update_step(
    state: web::Data<AppState>,
    identity: Identity,
    path: web::Path<Uuid>,
    body: web::Json<UpdateStepRequest>,
) -> AppResult<HttpResponse> {
    let step_id = path.into_inner();
    let step = state
        .steps
        .find_by_id(step_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Step not found".to_string()))?;

    owned_assignment(&state, step.assignment_id, &identity).await?;

    let updated = state.steps.set_completed(step_id, body.completed).await?;
    Ok(HttpResponse::Ok().json(step_response(updated)))
}
