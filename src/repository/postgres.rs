use async_trait::async_trait;
use sqlx::PgPool;

use super::{NewRecord, Record, RecordRepository, RecordUpdate, RepositoryError};

/// Postgres-backed repository over the `records` table.
pub struct PgRecordRepository {
    pool: PgPool,
}

impl PgRecordRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordRepository for PgRecordRepository {
    async fn create(&self, record: NewRecord) -> Result<i64, RepositoryError> {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO records (name, rating) VALUES ($1, $2) RETURNING id",
        )
        .bind(&record.name)
        .bind(record.rating)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(id, "record inserted");
        Ok(id)
    }

    async fn get_by_id(&self, id: i64) -> Result<Record, RepositoryError> {
        let row = sqlx::query_as::<_, Record>(
            "SELECT id, name, rating, created_at FROM records WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or(RepositoryError::NotFound)
    }

    async fn update(&self, record: RecordUpdate) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE records SET name = $1, rating = $2 WHERE id = $3")
            .bind(&record.name)
            .bind(record.rating)
            .bind(record.id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM records WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}

// Database-backed behavior (insert/read/update/delete against a live
// Postgres, including the zero-rows-affected mapping on real writes) is
// exercised by the handler tests through the in-memory repository and by
// integration runs against a provisioned database.
