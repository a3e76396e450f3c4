mod postgres;

pub use postgres::PgRecordRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Record Repository
// ============================================================================
//
// Domain-level persistence for the managed record entity. The repository is
// the single place that interprets raw store outcomes: a missing row or a
// zero-rows-affected write becomes `RepositoryError::NotFound`, everything
// else stays a database error for the caller to wrap.
//
// ============================================================================

/// The managed entity. `id` is assigned by the store on creation and never
/// changes; `created_at` is set once by the store.
#[derive(Serialize, Deserialize, Clone, Debug, FromRow)]
pub struct Record {
    pub id: i64,
    pub name: String,
    pub rating: i64,
    pub created_at: DateTime<Utc>,
}

/// Fields for an insert; the store assigns `id` and `created_at`.
#[derive(Clone, Debug)]
pub struct NewRecord {
    pub name: String,
    pub rating: i64,
}

/// Fields for an in-place update of an existing record.
#[derive(Clone, Debug)]
pub struct RecordUpdate {
    pub id: i64,
    pub name: String,
    pub rating: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Insert a record and return the store-assigned identifier.
    async fn create(&self, record: NewRecord) -> Result<i64, RepositoryError>;

    /// Fetch a record by identifier; `NotFound` when no row matches.
    async fn get_by_id(&self, id: i64) -> Result<Record, RepositoryError>;

    /// Update name and rating by identifier. Zero rows affected means the
    /// record never existed or was already deleted; both map to `NotFound`.
    async fn update(&self, record: RecordUpdate) -> Result<(), RepositoryError>;

    /// Delete by identifier, with the same zero-rows-affected rule as
    /// `update`.
    async fn delete(&self, id: i64) -> Result<(), RepositoryError>;
}
