//! Data Transfer Objects - request/response types for the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chat turn as exchanged with the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// A checklist step before it is numbered and stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDraftDto {
    pub title: String,
    pub description: String,
}

/// Response to a parse or save: the new assignment and its steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedAssignmentResponse {
    pub id: Uuid,
    pub title: String,
    pub steps: Vec<StepDraftDto>,
}

/// Request to store a checklist the client already has.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveAssignmentRequest {
    pub title: String,
    pub steps: Vec<StepDraftDto>,
    #[serde(default)]
    pub original_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResponse {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub step_number: i32,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub chat_history: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
}

/// Assignment row with its ordered steps and progress counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub original_text: String,
    pub created_at: DateTime<Utc>,
    pub steps: Vec<StepResponse>,
    #[serde(rename = "completedCount")]
    pub completed_count: usize,
    #[serde(rename = "totalSteps")]
    pub total_steps: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStepRequest {
    pub completed: bool,
}

/// Request to chat with the tutor about one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepChatRequest {
    pub assignment_id: Uuid,
    pub step_id: Uuid,
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_chat_request_uses_camel_case() {
        let json = serde_json::json!({
            "assignmentId": Uuid::nil(),
            "stepId": Uuid::nil(),
            "message": "help",
            "history": [{"role": "assistant", "content": "hi"}]
        });
        let req: StepChatRequest = serde_json::from_value(json).unwrap();
        assert_eq!(req.history[0].role, Role::Assistant);
    }

    #[test]
    fn progress_counters_keep_client_names() {
        let resp = AssignmentResponse {
            id: Uuid::nil(),
            user_id: Uuid::nil(),
            title: "Essay".into(),
            original_text: String::new(),
            created_at: Utc::now(),
            steps: vec![],
            completed_count: 0,
            total_steps: 0,
        };
        let value = serde_json::to_value(resp).unwrap();
        assert!(value.get("completedCount").is_some());
        assert!(value.get("totalSteps").is_some());
        assert!(value.get("original_text").is_some());
    }
}
