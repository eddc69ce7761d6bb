use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{QueueEntry, QueueStatus};

/// Retry queue for failed LMS submissions.
#[derive(Debug, Clone)]
pub struct QueueRepository {
    pool: PgPool,
}

impl QueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn enqueue(
        &self,
        artifact_id: Uuid,
        session_id: &str,
        retry_count: i32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<QueueEntry> {
        let row = sqlx::query(
            r#"
            INSERT INTO submission_queue
                (id, artifact_id, session_id, status, retry_count,
                 next_attempt_at, last_error)
            VALUES ($1, $2, $3, 'queued', $4, $5, $6)
            RETURNING id, artifact_id, session_id, status, retry_count,
                      next_attempt_at, last_error, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(artifact_id)
        .bind(session_id)
        .bind(retry_count)
        .bind(next_attempt_at)
        .bind(last_error)
        .fetch_one(&self.pool)
        .await?;

        map_row(&row)
    }

    /// Claim due entries below the retry cap. The status flip to
    /// `in_flight` keeps a second worker pass from picking the same rows.
    pub async fn claim_due(&self, max_retries: i32, limit: i64) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            r#"
            UPDATE submission_queue
            SET status = 'in_flight', updated_at = NOW()
            WHERE id IN (
                SELECT id FROM submission_queue
                WHERE status = 'queued'
                  AND next_attempt_at <= NOW()
                  AND retry_count < $1
                ORDER BY next_attempt_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, artifact_id, session_id, status, retry_count,
                      next_attempt_at, last_error, created_at, updated_at
            "#,
        )
        .bind(max_retries)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row).collect()
    }

    pub async fn mark(&self, id: Uuid, status: QueueStatus, last_error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE submission_queue
            SET status = $2, last_error = COALESCE($3, last_error), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Force all queued rows due now; used by the admin retry kick.
    pub async fn make_due_now(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE submission_queue SET next_attempt_at = NOW() WHERE status = 'queued'",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn counts_by_status(&self) -> Result<Vec<(String, i64)>> {
        let rows =
            sqlx::query("SELECT status, COUNT(*) AS n FROM submission_queue GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("status")?,
                    row.try_get::<i64, _>("n")?,
                ))
            })
            .collect()
    }

    pub async fn list_recent(&self, limit: i64) -> Result<Vec<QueueEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, artifact_id, session_id, status, retry_count,
                   next_attempt_at, last_error, created_at, updated_at
            FROM submission_queue
            ORDER BY updated_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_row).collect()
    }
}

fn map_row(row: &PgRow) -> Result<QueueEntry> {
    let read = |e: sqlx::Error| CoreError::Internal(format!("failed to read queue row: {e}"));
    Ok(QueueEntry {
        id: row.try_get("id").map_err(read)?,
        artifact_id: row.try_get("artifact_id").map_err(read)?,
        session_id: row.try_get("session_id").map_err(read)?,
        status: QueueStatus::parse(&row.try_get::<String, _>("status").map_err(read)?)?,
        retry_count: row.try_get("retry_count").map_err(read)?,
        next_attempt_at: row.try_get("next_attempt_at").map_err(read)?,
        last_error: row.try_get("last_error").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
        updated_at: row.try_get("updated_at").map_err(read)?,
    })
}
