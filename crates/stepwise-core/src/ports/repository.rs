use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Assignment, ChatMessage, ChecklistStep};
use crate::error::RepoError;

/// Generic repository trait defining standard row operations.
#[async_trait]
pub trait BaseRepository<T, ID>: Send + Sync {
    /// Find an entity by its unique ID.
    async fn find_by_id(&self, id: ID) -> Result<Option<T>, RepoError>;

    /// Insert a new entity.
    async fn insert(&self, entity: T) -> Result<T, RepoError>;

    /// Delete an entity by its ID.
    async fn delete(&self, id: ID) -> Result<(), RepoError>;
}

/// Assignment repository.
#[async_trait]
pub trait AssignmentRepository: BaseRepository<Assignment, Uuid> {
    /// All assignments of a user, newest first.
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Vec<Assignment>, RepoError>;
}

/// Checklist step repository.
#[async_trait]
pub trait StepRepository: BaseRepository<ChecklistStep, Uuid> {
    /// Steps of an assignment ordered by step number.
    async fn find_by_assignment_id(
        &self,
        assignment_id: Uuid,
    ) -> Result<Vec<ChecklistStep>, RepoError>;

    async fn insert_many(&self, steps: Vec<ChecklistStep>) -> Result<Vec<ChecklistStep>, RepoError>;

    async fn set_completed(&self, id: Uuid, completed: bool) -> Result<ChecklistStep, RepoError>;

    async fn set_chat_history(
        &self,
        id: Uuid,
        chat_history: Vec<ChatMessage>,
    ) -> Result<(), RepoError>;
}
