use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{StaffRole, StaffUser};

#[derive(Debug, Clone)]
pub struct StaffRepository {
    pool: PgPool,
}

impl StaffRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(
        &self,
        username: &str,
        password_hash: &str,
        role: StaffRole,
    ) -> Result<StaffUser> {
        let row = sqlx::query(
            r#"
            INSERT INTO staff_users (id, username, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING id, username, password_hash, role, is_active, created_at, last_login
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(username)
        .bind(password_hash)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return CoreError::Conflict("username already exists".to_string());
                }
            }
            CoreError::Internal(format!("failed to create staff user: {e}"))
        })?;

        let user = map_row(&row)?;
        info!(username = %user.username, "staff user created");
        Ok(user)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<StaffUser>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash, role, is_active, created_at, last_login
            FROM staff_users WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_row).transpose()
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<StaffUser>> {
        let row = sqlx::query(
            r#"
            SELECT id, username, password_hash, role, is_active, created_at, last_login
            FROM staff_users WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_row).transpose()
    }

    pub async fn touch_login(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE staff_users SET last_login = NOW() WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn map_row(row: &PgRow) -> Result<StaffUser> {
    let read = |e: sqlx::Error| CoreError::Internal(format!("failed to read staff row: {e}"));
    Ok(StaffUser {
        id: row.try_get("id").map_err(read)?,
        username: row.try_get("username").map_err(read)?,
        password_hash: row.try_get("password_hash").map_err(read)?,
        role: StaffRole::parse(&row.try_get::<String, _>("role").map_err(read)?)?,
        is_active: row.try_get("is_active").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
        last_login: row.try_get("last_login").map_err(read)?,
    })
}
