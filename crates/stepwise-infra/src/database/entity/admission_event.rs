//! Admission event entity - the PostgreSQL window store's log.

use sea_orm::entity::prelude::*;
use stepwise_core::domain::{AdmissionEvent, RateLimitKey};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "admission_events")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub key: String,
    pub occurred_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for AdmissionEvent {
    fn from(model: Model) -> Self {
        Self {
            key: RateLimitKey::from_raw(model.key),
            timestamp: model.occurred_at.into(),
        }
    }
}
