//! In-memory repositories - used when `DATABASE_URL` is not set.
//! Data is lost on process restart.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use stepwise_core::domain::{Assignment, ChatMessage, ChecklistStep};
use stepwise_core::error::RepoError;
use stepwise_core::ports::{AssignmentRepository, BaseRepository, StepRepository};

#[derive(Default)]
pub struct InMemoryAssignmentRepository {
    rows: RwLock<HashMap<Uuid, Assignment>>,
}

impl InMemoryAssignmentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaseRepository<Assignment, Uuid> for InMemoryAssignmentRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Assignment>, RepoError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn insert(&self, entity: Assignment) -> Result<Assignment, RepoError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entity.id) {
            return Err(RepoError::Constraint("Entity already exists".to_string()));
        }
        rows.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.rows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl AssignmentRepository for InMemoryAssignmentRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<Assignment>, RepoError> {
        let rows = self.rows.read().await;
        let mut owned: Vec<Assignment> = rows
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}

#[derive(Default)]
pub struct InMemoryStepRepository {
    rows: RwLock<HashMap<Uuid, ChecklistStep>>,
}

impl InMemoryStepRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BaseRepository<ChecklistStep, Uuid> for InMemoryStepRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<ChecklistStep>, RepoError> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn insert(&self, entity: ChecklistStep) -> Result<ChecklistStep, RepoError> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&entity.id) {
            return Err(RepoError::Constraint("Entity already exists".to_string()));
        }
        rows.insert(entity.id, entity.clone());
        Ok(entity)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RepoError> {
        self.rows
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl StepRepository for InMemoryStepRepository {
    async fn find_by_assignment_id(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<ChecklistStep>, RepoError> {
        let rows = self.rows.read().await;
        let mut steps: Vec<ChecklistStep> = rows
            .values()
            .filter(|s| s.assignment_id == assignment_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.step_number);
        Ok(steps)
    }

    async fn insert_many(&self, steps: Vec<ChecklistStep>) -> Result<Vec<ChecklistStep>, RepoError> {
        let mut rows = self.rows.write().await;
        if let Some(dup) = steps.iter().find(|s| rows.contains_key(&s.id)) {
            return Err(RepoError::Constraint(format!("step {} already exists", dup.id)));
        }
        for step in &steps {
            rows.insert(step.id, step.clone());
        }
        Ok(steps)
    }

    async fn set_completed(&self, id: Uuid, completed: bool) -> Result<ChecklistStep, RepoError> {
        let mut rows = self.rows.write().await;
        let step = rows.get_mut(&id).ok_or(RepoError::NotFound)?;
        step.completed = completed;
        Ok(step.clone())
    }

    async fn set_chat_history(
        &self,
        id: Uuid,
        chat_history: Vec<ChatMessage>,
    ) -> Result<(), RepoError> {
        let mut rows = self.rows.write().await;
        let step = rows.get_mut(&id).ok_or(RepoError::NotFound)?;
        step.chat_history = chat_history;
        Ok(())
    }
}
