use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{CoreError, Result};
use crate::model::StudentSession;

#[derive(Debug, Clone)]
pub struct SessionsRepository {
    pool: PgPool,
}

impl SessionsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        id: &str,
        moodle_username: &str,
        moodle_user_id: i64,
        encrypted_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<StudentSession> {
        let row = sqlx::query(
            r#"
            INSERT INTO student_sessions
                (id, moodle_username, moodle_user_id, encrypted_token, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, moodle_username, moodle_user_id, encrypted_token,
                      created_at, expires_at
            "#,
        )
        .bind(id)
        .bind(moodle_username)
        .bind(moodle_user_id)
        .bind(encrypted_token)
        .bind(expires_at)
        .fetch_one(&self.pool)
        .await?;

        map_row(&row)
    }

    /// Live session lookup; expired rows read as absent.
    pub async fn get_active(&self, id: &str) -> Result<Option<StudentSession>> {
        let row = sqlx::query(
            r#"
            SELECT id, moodle_username, moodle_user_id, encrypted_token,
                   created_at, expires_at
            FROM student_sessions
            WHERE id = $1 AND expires_at > NOW()
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_row).transpose()
    }

    /// Logout and token invalidation both reduce to deleting the row.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM student_sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Periodic cleanup of expired rows.
    pub async fn prune_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM student_sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn map_row(row: &PgRow) -> Result<StudentSession> {
    let read = |e: sqlx::Error| CoreError::Internal(format!("failed to read session row: {e}"));
    Ok(StudentSession {
        id: row.try_get("id").map_err(read)?,
        moodle_username: row.try_get("moodle_username").map_err(read)?,
        moodle_user_id: row.try_get("moodle_user_id").map_err(read)?,
        encrypted_token: row.try_get("encrypted_token").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
        expires_at: row.try_get("expires_at").map_err(read)?,
    })
}
