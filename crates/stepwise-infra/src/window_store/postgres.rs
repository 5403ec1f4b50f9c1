//! PostgreSQL window store over the `admission_events` table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbBackend, DbConn, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, Statement, TransactionTrait,
};
use uuid::Uuid;

use stepwise_core::domain::{AdmissionEvent, Decision, RateLimitKey, WindowPolicy};
use stepwise_core::ports::{WindowStore, WindowStoreError};

use crate::database::entity::admission_event::{self, Entity as AdmissionEvents};

/// Window store backed by the main database, shared by every instance.
///
/// `check_and_record` runs in one transaction holding an advisory lock on the
/// key and uses the database clock.
pub struct PostgresWindowStore {
    db: DbConn,
}

impl PostgresWindowStore {
    pub fn new(db: DbConn) -> Self {
        Self { db }
    }
}

fn db_err(e: DbErr) -> WindowStoreError {
    WindowStoreError::Unavailable(e.to_string())
}

async fn count_since<C: ConnectionTrait>(
    conn: &C,
    key: &RateLimitKey,
    since: DateTime<Utc>,
) -> Result<u64, DbErr> {
    AdmissionEvents::find()
        .filter(admission_event::Column::Key.eq(key.as_str()))
        .filter(admission_event::Column::OccurredAt.gte(since))
        .count(conn)
        .await
}

async fn oldest_since<C: ConnectionTrait>(
    conn: &C,
    key: &RateLimitKey,
    since: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, DbErr> {
    let first = AdmissionEvents::find()
        .filter(admission_event::Column::Key.eq(key.as_str()))
        .filter(admission_event::Column::OccurredAt.gte(since))
        .order_by_asc(admission_event::Column::OccurredAt)
        .one(conn)
        .await?;

    Ok(first.map(|model| AdmissionEvent::from(model).timestamp))
}

async fn insert_event<C: ConnectionTrait>(
    conn: &C,
    key: &RateLimitKey,
    at: DateTime<Utc>,
) -> Result<(), DbErr> {
    admission_event::ActiveModel {
        id: Set(Uuid::new_v4()),
        key: Set(key.as_str().to_string()),
        occurred_at: Set(at.into()),
    }
    .insert(conn)
    .await?;
    Ok(())
}

#[async_trait]
impl WindowStore for PostgresWindowStore {
    async fn count(&self, key: &RateLimitKey, since: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        count_since(&self.db, key, since).await.map_err(db_err)
    }

    async fn oldest(
        &self,
        key: &RateLimitKey,
        since: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, WindowStoreError> {
        oldest_since(&self.db, key, since).await.map_err(db_err)
    }

    async fn record(&self, key: &RateLimitKey, at: DateTime<Utc>) -> Result<(), WindowStoreError> {
        insert_event(&self.db, key, at).await.map_err(db_err)
    }

    async fn prune(&self, before: DateTime<Utc>) -> Result<u64, WindowStoreError> {
        let result = AdmissionEvents::delete_many()
            .filter(admission_event::Column::OccurredAt.lt(before))
            .exec(&self.db)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected)
    }

    async fn check_and_record(
        &self,
        key: &RateLimitKey,
        policy: &WindowPolicy,
        _now: DateTime<Utc>,
    ) -> Result<Decision, WindowStoreError> {
        let txn = self.db.begin().await.map_err(db_err)?;

        // Serializes checks for this key across instances until commit.
        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT pg_advisory_xact_lock(hashtext($1))",
            [key.as_str().into()],
        ))
        .await
        .map_err(db_err)?;

        let now: DateTime<Utc> = txn
            .query_one(Statement::from_string(
                DbBackend::Postgres,
                "SELECT now() AS now",
            ))
            .await
            .map_err(db_err)?
            .ok_or_else(|| WindowStoreError::Corrupt("now() returned no row".to_string()))?
            .try_get("", "now")
            .map_err(|e| WindowStoreError::Corrupt(e.to_string()))?;

        let since = policy.window_start(now);
        let admitted = count_since(&txn, key, since).await.map_err(db_err)?;

        let decision = if policy.is_exhausted(admitted) {
            let oldest = oldest_since(&txn, key, since).await.map_err(db_err)?;
            Decision::rejected(policy, oldest, now)
        } else {
            insert_event(&txn, key, now).await.map_err(db_err)?;
            Decision::Admitted
        };

        txn.commit().await.map_err(db_err)?;
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use chrono::TimeDelta;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult, Value};

    use super::*;

    fn row(column: &str, value: Value) -> BTreeMap<&str, Value> {
        BTreeMap::from([(column, value)])
    }

    #[tokio::test]
    async fn full_window_is_rejected_using_database_clock() {
        let db_now = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let oldest = db_now - TimeDelta::seconds(20);

        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 0,
            }])
            .append_query_results([[row("now", db_now.into())]])
            .append_query_results([[row("num_items", 1i64.into())]])
            .append_query_results([[admission_event::Model {
                id: Uuid::new_v4(),
                key: "parse:u1".to_string(),
                occurred_at: oldest.into(),
            }]])
            .into_connection();

        let store = PostgresWindowStore::new(db);
        let policy = WindowPolicy::new(1, Duration::from_secs(60)).unwrap();

        // The caller's clock is ignored in favour of the database's.
        let decision = store
            .check_and_record(&RateLimitKey::new("parse", "u1"), &policy, Utc::now())
            .await
            .unwrap();

        assert_eq!(
            decision,
            Decision::Rejected {
                retry_after: Duration::from_secs(40)
            }
        );
    }

    #[tokio::test]
    async fn prune_reports_rows_removed() {
        let db = MockDatabase::new(DatabaseBackend::Postgres)
            .append_exec_results([MockExecResult {
                last_insert_id: 0,
                rows_affected: 7,
            }])
            .into_connection();

        let store = PostgresWindowStore::new(db);
        assert_eq!(store.prune(Utc::now()).await.unwrap(), 7);
    }
}
