use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{ExamType, SubjectMapping, UsernameRegisterMap};

/// Subject-to-assignment and username-to-register mappings.
#[derive(Debug, Clone)]
pub struct MappingsRepository {
    pool: PgPool,
}

impl MappingsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_subject_mapping(
        &self,
        subject_code: &str,
        exam_type: ExamType,
        moodle_course_id: i64,
        moodle_assignment_id: i64,
    ) -> Result<SubjectMapping> {
        let row = sqlx::query(
            r#"
            INSERT INTO subject_mappings
                (id, subject_code, exam_type, moodle_course_id, moodle_assignment_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, subject_code, exam_type, moodle_course_id,
                      moodle_assignment_id, is_active, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subject_code)
        .bind(exam_type.as_str())
        .bind(moodle_course_id)
        .bind(moodle_assignment_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return CoreError::Conflict(format!(
                        "mapping for ({subject_code}, {exam_type}) already exists"
                    ));
                }
            }
            CoreError::Internal(format!("failed to create subject mapping: {e}"))
        })?;

        map_subject_row(&row)
    }

    pub async fn list_subject_mappings(&self) -> Result<Vec<SubjectMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT id, subject_code, exam_type, moodle_course_id,
                   moodle_assignment_id, is_active, created_at
            FROM subject_mappings
            ORDER BY subject_code, exam_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_subject_row).collect()
    }

    /// The active binding for a `(subject, exam_type)` tuple, if any.
    pub async fn get_active_subject_mapping(
        &self,
        subject_code: &str,
        exam_type: ExamType,
    ) -> Result<Option<SubjectMapping>> {
        let row = sqlx::query(
            r#"
            SELECT id, subject_code, exam_type, moodle_course_id,
                   moodle_assignment_id, is_active, created_at
            FROM subject_mappings
            WHERE subject_code = $1 AND exam_type = $2 AND is_active
            "#,
        )
        .bind(subject_code)
        .bind(exam_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(map_subject_row).transpose()
    }

    pub async fn delete_subject_mapping(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subject_mappings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn create_username_mapping(
        &self,
        moodle_username: &str,
        register_number: &str,
    ) -> Result<UsernameRegisterMap> {
        let row = sqlx::query(
            r#"
            INSERT INTO username_register_map (id, moodle_username, register_number)
            VALUES ($1, $2, $3)
            RETURNING id, moodle_username, register_number, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(moodle_username)
        .bind(register_number)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return CoreError::Conflict(
                        "username or register number already mapped".to_string(),
                    );
                }
            }
            CoreError::Internal(format!("failed to create username mapping: {e}"))
        })?;

        map_username_row(&row)
    }

    pub async fn list_username_mappings(&self) -> Result<Vec<UsernameRegisterMap>> {
        let rows = sqlx::query(
            r#"
            SELECT id, moodle_username, register_number, created_at
            FROM username_register_map
            ORDER BY register_number
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(map_username_row).collect()
    }

    pub async fn register_for_username(&self, moodle_username: &str) -> Result<Option<String>> {
        let register = sqlx::query_scalar::<_, String>(
            "SELECT register_number FROM username_register_map WHERE moodle_username = $1",
        )
        .bind(moodle_username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(register)
    }

    pub async fn username_for_register(&self, register_number: &str) -> Result<Option<String>> {
        let username = sqlx::query_scalar::<_, String>(
            "SELECT moodle_username FROM username_register_map WHERE register_number = $1",
        )
        .bind(register_number)
        .fetch_optional(&self.pool)
        .await?;
        Ok(username)
    }

    pub async fn register_is_mapped(&self, register_number: &str) -> Result<bool> {
        Ok(self.username_for_register(register_number).await?.is_some())
    }

    pub async fn delete_username_mapping(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM username_register_map WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn map_subject_row(row: &PgRow) -> Result<SubjectMapping> {
    let read = |e: sqlx::Error| CoreError::Internal(format!("failed to read mapping row: {e}"));
    Ok(SubjectMapping {
        id: row.try_get("id").map_err(read)?,
        subject_code: row.try_get("subject_code").map_err(read)?,
        exam_type: ExamType::parse(&row.try_get::<String, _>("exam_type").map_err(read)?)?,
        moodle_course_id: row.try_get("moodle_course_id").map_err(read)?,
        moodle_assignment_id: row.try_get("moodle_assignment_id").map_err(read)?,
        is_active: row.try_get("is_active").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}

fn map_username_row(row: &PgRow) -> Result<UsernameRegisterMap> {
    let read = |e: sqlx::Error| CoreError::Internal(format!("failed to read mapping row: {e}"));
    Ok(UsernameRegisterMap {
        id: row.try_get("id").map_err(read)?,
        moodle_username: row.try_get("moodle_username").map_err(read)?,
        register_number: row.try_get("register_number").map_err(read)?,
        created_at: row.try_get("created_at").map_err(read)?,
    })
}
