//! Assignment entity for SeaORM.

use sea_orm::Set;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "assignments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub original_text: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::checklist_step::Entity")]
    ChecklistStep,
}

impl Related<super::checklist_step::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ChecklistStep.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for stepwise_core::domain::Assignment {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            title: model.title,
            original_text: model.original_text,
            created_at: model.created_at.into(),
        }
    }
}

impl From<stepwise_core::domain::Assignment> for ActiveModel {
    fn from(assignment: stepwise_core::domain::Assignment) -> Self {
        Self {
            id: Set(assignment.id),
            user_id: Set(assignment.user_id),
            title: Set(assignment.title),
            original_text: Set(assignment.original_text),
            created_at: Set(assignment.created_at.into()),
        }
    }
}
