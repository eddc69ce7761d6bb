use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{AuditEntry, NewAuditEntry};

/// Append-only audit log.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: PgPool,
}

impl AuditRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn log(&self, entry: NewAuditEntry) -> Result<AuditEntry> {
        insert(&self.pool, entry).await
    }

    /// Recent entries, newest first, optionally filtered by action and
    /// actor type.
    pub async fn list(
        &self,
        action: Option<&str>,
        actor_type: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, actor_type, actor_id, actor_username,
                   target, request_payload, result, created_at
            FROM audit_log
            WHERE ($1::text IS NULL OR action = $1)
              AND ($2::text IS NULL OR actor_type = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(action)
        .bind(actor_type)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row).collect()
    }

    pub async fn for_target(&self, target: &str) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, action, actor_type, actor_id, actor_username,
                   target, request_payload, result, created_at
            FROM audit_log
            WHERE target = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(target)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_row).collect()
    }
}

/// Insert on an arbitrary executor so repository transactions can write
/// their own audit rows atomically with the mutation they record.
pub(crate) async fn insert<'e, E>(executor: E, entry: NewAuditEntry) -> Result<AuditEntry>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO audit_log
            (id, action, actor_type, actor_id, actor_username,
             target, request_payload, result)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, action, actor_type, actor_id, actor_username,
                  target, request_payload, result, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&entry.action)
    .bind(&entry.actor_type)
    .bind(&entry.actor_id)
    .bind(&entry.actor_username)
    .bind(&entry.target)
    .bind(&entry.request_payload)
    .bind(&entry.result)
    .fetch_one(executor)
    .await?;

    map_row(&row)
}

fn map_row(row: &PgRow) -> Result<AuditEntry> {
    let read = |e: sqlx::Error| CoreError::Internal(format!("failed to read audit row: {e}"));
    Ok(AuditEntry {
        id: row.try_get("id").map_err(read)?,
        action: row.try_get("action").map_err(read)?,
        actor_type: row.try_get("actor_type").map_err(read)?,
        actor_id: row.try_get("actor_id").map_err(read)?,
        actor_username: row.try_get("actor_username").map_err(read)?,
        target: row.try_get("target").map_err(read)?,
        request_payload: row.try_get("request_payload").map_err(read)?,
        result: row.try_get::<String, _>("result").map_err(read)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(read)?,
    })
}
