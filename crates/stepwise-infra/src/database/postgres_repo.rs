//! PostgreSQL repository implementations.

use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter, QueryOrder, Set};
use uuid::Uuid;

use stepwise_core::domain::{Assignment, ChatMessage, ChecklistStep};
use stepwise_core::error::RepoError;
use stepwise_core::ports::{AssignmentRepository, StepRepository};

use super::entity::assignment::{self, Entity as AssignmentEntity};
use super::entity::checklist_step::{self, Entity as StepEntity, history_to_json};
use super::postgres_base::{PostgresBaseRepository, query_err};

pub type PostgresAssignmentRepository = PostgresBaseRepository<AssignmentEntity>;

pub type PostgresStepRepository = PostgresBaseRepository<StepEntity>;

#[async_trait]
impl AssignmentRepository for PostgresAssignmentRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<Assignment>, RepoError> {
        let result = AssignmentEntity::find()
            .filter(assignment::Column::UserId.eq(user_id))
            .order_by_desc(assignment::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(query_err)?;

        Ok(result.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl StepRepository for PostgresStepRepository {
    async fn find_by_assignment_id(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<ChecklistStep>, RepoError> {
        let result = StepEntity::find()
            .filter(checklist_step::Column::AssignmentId.eq(assignment_id))
            .order_by_asc(checklist_step::Column::StepNumber)
            .all(&self.db)
            .await
            .map_err(query_err)?;

        Ok(result.into_iter().map(Into::into).collect())
    }

    async fn insert_many(&self, steps: Vec<ChecklistStep>) -> Result<Vec<ChecklistStep>, RepoError> {
        if steps.is_empty() {
            return Ok(steps);
        }

        let models: Vec<checklist_step::ActiveModel> =
            steps.iter().cloned().map(Into::into).collect();
        StepEntity::insert_many(models)
            .exec(&self.db)
            .await
            .map_err(query_err)?;

        tracing::debug!(count = steps.len(), "Inserted checklist steps");
        Ok(steps)
    }

    async fn set_completed(&self, id: Uuid, completed: bool) -> Result<ChecklistStep, RepoError> {
        let model = StepEntity::find_by_id(id)
            .one(&self.db)
            .await
            .map_err(query_err)?
            .ok_or(RepoError::NotFound)?;

        let mut active = model.into_active_model();
        active.completed = Set(completed);
        let updated = active.update(&self.db).await.map_err(query_err)?;
        Ok(updated.into())
    }

    async fn set_chat_history(
        &self,
        id: Uuid,
        chat_history: Vec<ChatMessage>,
    ) -> Result<(), RepoError> {
        let result = StepEntity::update_many()
            .col_expr(
                checklist_step::Column::ChatHistory,
                Expr::value(history_to_json(&chat_history)),
            )
            .filter(checklist_step::Column::Id.eq(id))
            .exec(&self.db)
            .await
            .map_err(query_err)?;

        if result.rows_affected == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
