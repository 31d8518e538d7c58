//! Postgres-backed subscription store.
//!
//! One row per subscription. Locks are Postgres session-level advisory locks:
//! `acquire_lock` checks out a dedicated pooled connection, takes
//! `pg_try_advisory_lock` on it and keeps the connection until `release_lock`,
//! so the lock lives exactly as long as the engine holds it.
//!
//! The store is synchronous like every other store in this crate. It drives
//! `sqlx` through the tokio runtime handle captured at construction, so it must
//! not be called from inside that runtime's worker threads.
//!
//! ## Error Mapping
//!
//! | source | SubscriptionStoreError |
//! |---|---|
//! | no runtime at construction, pool/IO/SQL failure | `Storage` |
//! | undecodable column (unknown status, negative position) | `Malformed` |
//! | `INSERT` hit an existing id | `Duplicate` |
//! | `update` on a missing id | `NotFound` |

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::runtime::Handle;
use tracing::{debug, instrument};

use contentrepo_core::{SubscriptionGroup, SubscriptionId};
use contentrepo_events::{
    SequenceNumber, Subscription, SubscriptionError, SubscriptionStatus, Subscriptions,
};

use super::criteria::SubscriptionCriteria;
use super::store::{SubscriptionStore, SubscriptionStoreError};

pub const DEFAULT_TABLE_NAME: &str = "content_repository_subscriptions";

const COLUMNS: &str = "id, group_name, run_mode, status, position, retry_attempt, last_saved_at, \
     error_message, error_previous_status, error_trace";

/// Raw column values of one subscription row.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SubscriptionRecord {
    id: String,
    group_name: String,
    run_mode: String,
    status: String,
    position: i64,
    retry_attempt: i32,
    last_saved_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
    error_previous_status: Option<String>,
    error_trace: Option<String>,
}

impl SubscriptionRecord {
    fn from_row(row: &PgRow) -> Result<Self, SubscriptionStoreError> {
        Ok(Self {
            id: row.try_get("id").map_err(malformed)?,
            group_name: row.try_get("group_name").map_err(malformed)?,
            run_mode: row.try_get("run_mode").map_err(malformed)?,
            status: row.try_get("status").map_err(malformed)?,
            position: row.try_get("position").map_err(malformed)?,
            retry_attempt: row.try_get("retry_attempt").map_err(malformed)?,
            last_saved_at: row.try_get("last_saved_at").map_err(malformed)?,
            error_message: row.try_get("error_message").map_err(malformed)?,
            error_previous_status: row.try_get("error_previous_status").map_err(malformed)?,
            error_trace: row.try_get("error_trace").map_err(malformed)?,
        })
    }

    fn from_subscription(subscription: &Subscription) -> Result<Self, SubscriptionStoreError> {
        let position = i64::try_from(subscription.position.value()).map_err(|_| {
            SubscriptionStoreError::Malformed(format!(
                "position {} of '{}' exceeds BIGINT",
                subscription.position, subscription.id
            ))
        })?;
        let retry_attempt = i32::try_from(subscription.retry_attempt).map_err(|_| {
            SubscriptionStoreError::Malformed(format!(
                "retry attempt {} of '{}' exceeds INTEGER",
                subscription.retry_attempt, subscription.id
            ))
        })?;
        let error = subscription.error.as_ref();

        Ok(Self {
            id: subscription.id.to_string(),
            group_name: subscription.group.to_string(),
            run_mode: subscription.run_mode.as_str().to_string(),
            status: subscription.status.as_str().to_string(),
            position,
            retry_attempt,
            last_saved_at: subscription.last_saved_at,
            error_message: error.map(|e| e.message.clone()),
            error_previous_status: error.map(|e| e.previous_status.as_str().to_string()),
            error_trace: error.and_then(|e| e.error_trace.clone()),
        })
    }
}

impl TryFrom<SubscriptionRecord> for Subscription {
    type Error = SubscriptionStoreError;

    fn try_from(record: SubscriptionRecord) -> Result<Self, Self::Error> {
        let invalid = |e: contentrepo_core::DomainError| SubscriptionStoreError::Malformed(e.to_string());

        let position = u64::try_from(record.position).map_err(|_| {
            SubscriptionStoreError::Malformed(format!("negative position {}", record.position))
        })?;
        let retry_attempt = u32::try_from(record.retry_attempt).map_err(|_| {
            SubscriptionStoreError::Malformed(format!("negative retry attempt {}", record.retry_attempt))
        })?;

        let error = match (record.error_message, record.error_previous_status) {
            (Some(message), Some(previous_status)) => Some(SubscriptionError {
                message,
                previous_status: previous_status.parse().map_err(invalid)?,
                error_trace: record.error_trace,
            }),
            (None, None) => None,
            _ => {
                return Err(SubscriptionStoreError::Malformed(format!(
                    "subscription '{}' has a partial error record",
                    record.id
                )));
            }
        };

        Ok(Subscription {
            id: SubscriptionId::new(record.id).map_err(invalid)?,
            group: SubscriptionGroup::new(record.group_name).map_err(invalid)?,
            run_mode: record.run_mode.parse().map_err(invalid)?,
            status: record.status.parse().map_err(invalid)?,
            position: SequenceNumber::new(position),
            retry_attempt,
            last_saved_at: record.last_saved_at,
            error,
        })
    }
}

fn malformed(err: sqlx::Error) -> SubscriptionStoreError {
    SubscriptionStoreError::Malformed(err.to_string())
}

fn storage(err: sqlx::Error) -> SubscriptionStoreError {
    SubscriptionStoreError::Storage(err.to_string())
}

fn poisoned() -> SubscriptionStoreError {
    SubscriptionStoreError::Storage("lock connection registry poisoned".to_string())
}

/// Dedicated lock connections by subscription id.
///
/// A slot is reserved before the database round trip and filled afterwards;
/// the map itself is only locked for the bookkeeping.
#[derive(Debug)]
struct LockSlots<C> {
    slots: Mutex<HashMap<SubscriptionId, Option<C>>>,
}

impl<C> LockSlots<C> {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// `false` when the id is already held or being acquired.
    fn reserve(&self, id: &SubscriptionId) -> Result<bool, SubscriptionStoreError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        if slots.contains_key(id) {
            return Ok(false);
        }
        slots.insert(id.clone(), None);
        Ok(true)
    }

    fn fill(&self, id: &SubscriptionId, connection: C) -> Result<(), SubscriptionStoreError> {
        self.slots
            .lock()
            .map_err(|_| poisoned())?
            .insert(id.clone(), Some(connection));
        Ok(())
    }

    /// Drop a reservation that did not end up holding a connection.
    fn cancel(&self, id: &SubscriptionId) -> Result<(), SubscriptionStoreError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        if matches!(slots.get(id), Some(None)) {
            slots.remove(id);
        }
        Ok(())
    }

    /// Take the held connection. A pending reservation stays in place.
    fn take(&self, id: &SubscriptionId) -> Result<Option<C>, SubscriptionStoreError> {
        let mut slots = self.slots.lock().map_err(|_| poisoned())?;
        match slots.get(id) {
            Some(Some(_)) => Ok(slots.remove(id).flatten()),
            _ => Ok(None),
        }
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table_name: &str) -> Result<(), SubscriptionStoreError> {
    let mut chars = table_name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid_start && valid_rest && table_name.len() <= 63 {
        Ok(())
    } else {
        Err(SubscriptionStoreError::Storage(format!(
            "invalid subscription table name '{table_name}'"
        )))
    }
}

pub struct PostgresSubscriptionStore {
    pool: Arc<PgPool>,
    runtime: Handle,
    table_name: String,
    lock_connections: LockSlots<PoolConnection<Postgres>>,
}

impl core::fmt::Debug for PostgresSubscriptionStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PostgresSubscriptionStore")
            .field("table_name", &self.table_name)
            .finish_non_exhaustive()
    }
}

impl PostgresSubscriptionStore {
    /// Create a store on the default table, bound to the current tokio runtime.
    pub fn new(pool: PgPool) -> Result<Self, SubscriptionStoreError> {
        let runtime = Handle::try_current().map_err(|e| {
            SubscriptionStoreError::Storage(format!("no tokio runtime available: {e}"))
        })?;
        Self::with_runtime(pool, runtime, DEFAULT_TABLE_NAME)
    }

    pub fn with_runtime(
        pool: PgPool,
        runtime: Handle,
        table_name: impl Into<String>,
    ) -> Result<Self, SubscriptionStoreError> {
        let table_name = table_name.into();
        validate_table_name(&table_name)?;
        Ok(Self {
            pool: Arc::new(pool),
            runtime,
            table_name,
            lock_connections: LockSlots::new(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn lock_key(&self, id: &SubscriptionId) -> String {
        format!("{}:{}", self.table_name, id)
    }
}

impl SubscriptionStore for PostgresSubscriptionStore {
    #[instrument(skip(self), fields(table = %self.table_name))]
    fn setup(&self) -> Result<(), SubscriptionStoreError> {
        let sql = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id VARCHAR(255) PRIMARY KEY,
                group_name VARCHAR(255) NOT NULL,
                run_mode VARCHAR(16) NOT NULL,
                status VARCHAR(32) NOT NULL,
                position BIGINT NOT NULL,
                retry_attempt INTEGER NOT NULL,
                last_saved_at TIMESTAMPTZ NULL,
                error_message TEXT NULL,
                error_previous_status VARCHAR(32) NULL,
                error_trace TEXT NULL
            )
            "#,
            table = self.table_name
        );
        let pool = self.pool.clone();
        self.runtime.block_on(async move {
            sqlx::query(&sql).execute(&*pool).await.map_err(storage)?;
            debug!("subscription table is ready");
            Ok(())
        })
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    fn find_by_criteria(
        &self,
        criteria: &SubscriptionCriteria,
    ) -> Result<Subscriptions, SubscriptionStoreError> {
        let mut query: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {COLUMNS} FROM {} WHERE TRUE", self.table_name));
        if let Some(ids) = &criteria.ids {
            let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
            query.push(" AND id = ANY(").push_bind(ids).push(")");
        }
        if let Some(groups) = &criteria.groups {
            let groups: Vec<String> = groups.iter().map(ToString::to_string).collect();
            query.push(" AND group_name = ANY(").push_bind(groups).push(")");
        }
        if let Some(statuses) = &criteria.statuses {
            let statuses: Vec<String> = statuses.iter().map(|s| s.as_str().to_string()).collect();
            query.push(" AND status = ANY(").push_bind(statuses).push(")");
        }
        query.push(" ORDER BY id");

        let pool = self.pool.clone();
        self.runtime.block_on(async move {
            let rows = query.build().fetch_all(&*pool).await.map_err(storage)?;
            rows.iter()
                .map(|row| Subscription::try_from(SubscriptionRecord::from_row(row)?))
                .collect::<Result<Subscriptions, _>>()
        })
    }

    #[instrument(skip(self, subscription), fields(table = %self.table_name, subscription_id = %subscription.id))]
    fn add(&self, subscription: Subscription) -> Result<(), SubscriptionStoreError> {
        let record =
            SubscriptionRecord::from_subscription(&subscription.with_last_saved_at(Utc::now()))?;
        let sql = format!(
            "INSERT INTO {} ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (id) DO NOTHING",
            self.table_name
        );
        let pool = self.pool.clone();
        self.runtime.block_on(async move {
            let result = sqlx::query(&sql)
                .bind(&record.id)
                .bind(&record.group_name)
                .bind(&record.run_mode)
                .bind(&record.status)
                .bind(record.position)
                .bind(record.retry_attempt)
                .bind(record.last_saved_at)
                .bind(&record.error_message)
                .bind(&record.error_previous_status)
                .bind(&record.error_trace)
                .execute(&*pool)
                .await
                .map_err(storage)?;
            if result.rows_affected() == 0 {
                let id = SubscriptionId::new(record.id)
                    .map_err(|e| SubscriptionStoreError::Malformed(e.to_string()))?;
                return Err(SubscriptionStoreError::Duplicate(id));
            }
            Ok(())
        })
    }

    #[instrument(skip(self, change), fields(table = %self.table_name))]
    fn update(
        &self,
        id: &SubscriptionId,
        change: &dyn Fn(Subscription) -> Subscription,
    ) -> Result<Subscription, SubscriptionStoreError> {
        let select = format!("SELECT {COLUMNS} FROM {} WHERE id = $1 FOR UPDATE", self.table_name);
        let update = format!(
            "UPDATE {} SET group_name = $2, run_mode = $3, status = $4, position = $5, \
             retry_attempt = $6, last_saved_at = $7, error_message = $8, \
             error_previous_status = $9, error_trace = $10 WHERE id = $1",
            self.table_name
        );
        let pool = self.pool.clone();

        self.runtime.block_on(async move {
            let mut tx = pool.begin().await.map_err(storage)?;

            let row = sqlx::query(&select)
                .bind(id.as_str())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?
                .ok_or_else(|| SubscriptionStoreError::NotFound(id.clone()))?;
            let current = Subscription::try_from(SubscriptionRecord::from_row(&row)?)?;

            let mut changed = change(current).with_last_saved_at(Utc::now());
            changed.id = id.clone();
            let record = SubscriptionRecord::from_subscription(&changed)?;

            sqlx::query(&update)
                .bind(&record.id)
                .bind(&record.group_name)
                .bind(&record.run_mode)
                .bind(&record.status)
                .bind(record.position)
                .bind(record.retry_attempt)
                .bind(record.last_saved_at)
                .bind(&record.error_message)
                .bind(&record.error_previous_status)
                .bind(&record.error_trace)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;

            tx.commit().await.map_err(storage)?;
            Ok(changed)
        })
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    fn acquire_lock(&self, id: &SubscriptionId) -> Result<bool, SubscriptionStoreError> {
        if !self.lock_connections.reserve(id)? {
            return Ok(false);
        }

        let key = self.lock_key(id);
        let pool = self.pool.clone();
        let acquired = self.runtime.block_on(async move {
            let mut connection = pool.acquire().await.map_err(storage)?;
            let locked: bool = sqlx::query("SELECT pg_try_advisory_lock(hashtext($1))")
                .bind(&key)
                .fetch_one(&mut *connection)
                .await
                .map_err(storage)?
                .try_get(0)
                .map_err(malformed)?;
            Ok::<_, SubscriptionStoreError>(locked.then_some(connection))
        });

        match acquired {
            Ok(Some(connection)) => {
                self.lock_connections.fill(id, connection)?;
                Ok(true)
            }
            Ok(None) => {
                self.lock_connections.cancel(id)?;
                Ok(false)
            }
            Err(err) => {
                self.lock_connections.cancel(id)?;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(table = %self.table_name))]
    fn release_lock(&self, id: &SubscriptionId) -> Result<(), SubscriptionStoreError> {
        let Some(mut connection) = self.lock_connections.take(id)? else {
            return Ok(());
        };

        let key = self.lock_key(id);
        self.runtime.block_on(async move {
            let released: bool = sqlx::query("SELECT pg_advisory_unlock(hashtext($1))")
                .bind(&key)
                .fetch_one(&mut *connection)
                .await
                .map_err(storage)?
                .try_get(0)
                .map_err(malformed)?;
            if !released {
                debug!(lock_key = %key, "advisory lock was not held by this session");
            }
            Ok(())
        })
    }
}
