use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::chat::ChatMessage;

/// Assignment entity - an uploaded document turned into a checklist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    pub original_text: String,
    pub created_at: DateTime<Utc>,
}

impl Assignment {
    pub fn new(user_id: Uuid, title: String, original_text: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            title,
            original_text,
            created_at: Utc::now(),
        }
    }

    pub fn is_owned_by(&self, user_id: Uuid) -> bool {
        self.user_id == user_id
    }
}

/// A step as proposed by the model or the client, before it is numbered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDraft {
    pub title: String,
    pub description: String,
}

/// Checklist step entity, carrying its own tutoring chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistStep {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub step_number: i32,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub chat_history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

impl ChecklistStep {
    pub fn new(assignment_id: Uuid, step_number: i32, draft: StepDraft) -> Self {
        Self {
            id: Uuid::new_v4(),
            assignment_id,
            step_number,
            title: draft.title,
            description: draft.description,
            completed: false,
            chat_history: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Number drafts from 1 in the given order.
    pub fn numbered(assignment_id: Uuid, drafts: Vec<StepDraft>) -> Vec<Self> {
        drafts
            .into_iter()
            .zip(1..)
            .map(|(draft, number)| Self::new(assignment_id, number, draft))
            .collect()
    }
}
