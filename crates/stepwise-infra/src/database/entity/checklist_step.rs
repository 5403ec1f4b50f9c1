//! Checklist step entity for SeaORM. `chat_history` is a JSONB array of
//! `{role, content}` objects.

use sea_orm::Set;
use sea_orm::entity::prelude::*;

use stepwise_core::domain::ChatMessage;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "checklist_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub step_number: i32,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    pub completed: bool,
    #[sea_orm(column_type = "JsonBinary")]
    pub chat_history: Json,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::assignment::Entity",
        from = "Column::AssignmentId",
        to = "super::assignment::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Assignment,
}

impl Related<super::assignment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Assignment.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

pub(crate) fn history_to_json(history: &[ChatMessage]) -> Json {
    serde_json::to_value(history).unwrap_or_else(|_| Json::Array(Vec::new()))
}

impl From<Model> for stepwise_core::domain::ChecklistStep {
    fn from(model: Model) -> Self {
        let chat_history = serde_json::from_value(model.chat_history).unwrap_or_else(|e| {
            tracing::warn!(step_id = %model.id, error = %e, "Unreadable chat history, starting empty");
            Vec::new()
        });

        Self {
            id: model.id,
            assignment_id: model.assignment_id,
            step_number: model.step_number,
            title: model.title,
            description: model.description,
            completed: model.completed,
            chat_history,
            created_at: model.created_at.into(),
        }
    }
}

impl From<stepwise_core::domain::ChecklistStep> for ActiveModel {
    fn from(step: stepwise_core::domain::ChecklistStep) -> Self {
        Self {
            id: Set(step.id),
            assignment_id: Set(step.assignment_id),
            step_number: Set(step.step_number),
            title: Set(step.title),
            description: Set(step.description),
            completed: Set(step.completed),
            chat_history: Set(history_to_json(&step.chat_history)),
            created_at: Set(step.created_at.into()),
        }
    }
}
