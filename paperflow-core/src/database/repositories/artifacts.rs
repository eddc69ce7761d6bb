use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use super::audit;
use crate::error::{CoreError, Result};
use crate::identity;
use crate::model::{
    Artifact, ArtifactSummary, ExamType, NewArtifact, NewAuditEntry, WorkflowStatus,
};

/// Column list shared by every artifact SELECT. The blob column is
/// deliberately absent; bytes are fetched through the storage layer.
const COLUMNS: &str = r#"
    id, raw_filename, canonical_filename, parsed_reg_no, parsed_subject_code,
    exam_type, attempt_number, content_hash, size_bytes, mime_type, disk_path,
    moodle_user_id, moodle_username, course_id, assignment_id, draft_item_id,
    submission_id, workflow_status, idempotency_key, transaction_log,
    error_message, retry_count, auto_processed, tombstoned, uploaded_by,
    uploaded_at, validated_at, submitted_at, completed_at
"#;

/// Listing filters for the staff and admin views.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub status: Option<WorkflowStatus>,
    pub register_number: Option<String>,
    pub uploaded_by: Option<Uuid>,
    pub auto_processed: Option<bool>,
    pub include_superseded: bool,
    /// Artifacts whose register number has no username mapping.
    pub unassigned_only: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactPage {
    pub total: i64,
    pub artifacts: Vec<ArtifactSummary>,
}

/// Latest-attempt probe result for duplicate checking.
#[derive(Debug, Clone)]
pub struct TupleProbe {
    pub status: WorkflowStatus,
    pub attempt_number: i32,
    pub uploaded_at: DateTime<Utc>,
}

/// CRUD and workflow transitions over the artifact table.
///
/// Per-fingerprint writes are serialized with a transaction-scoped
/// advisory lock, so concurrent uploads of the same paper cannot race the
/// supersession bookkeeping.
#[derive(Debug, Clone)]
pub struct ArtifactsRepository {
    pool: PgPool,
}

impl ArtifactsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert protocol: dedupe on the idempotency key, supersede prior
    /// attempts, insert `PENDING`, audit, all in one transaction.
    ///
    /// Returns the artifact and whether a new row was created. A raced
    /// commit (unique violation) resolves to the winner's row.
    pub async fn create(
        &self,
        new: NewArtifact,
        actor: Option<(&str, &str)>,
    ) -> Result<(Artifact, bool)> {
        let fingerprint = match (&new.parsed_reg_no, &new.parsed_subject_code) {
            (Some(reg), Some(subject)) => Some(identity::fingerprint(
                reg,
                subject,
                new.exam_type,
                &new.content_hash,
            )),
            _ => None,
        };

        match self.try_create(&new, fingerprint.as_deref(), actor).await {
            Ok(outcome) => Ok(outcome),
            Err(CoreError::Conflict(_)) => {
                // Someone committed between our dedupe check and our
                // insert. Identical bytes: return their row. Different
                // bytes racing for the same attempt slot: take the lock
                // again and insert behind them.
                let key = fingerprint.ok_or_else(|| {
                    CoreError::Internal("conflict without idempotency key".to_string())
                })?;
                match self.get_by_idempotency_key(&key).await? {
                    Some(existing) => Ok((existing, false)),
                    None => self.try_create(&new, Some(&key), actor).await,
                }
            }
            Err(other) => Err(other),
        }
    }

    async fn try_create(
        &self,
        new: &NewArtifact,
        fingerprint: Option<&str>,
        actor: Option<(&str, &str)>,
    ) -> Result<(Artifact, bool)> {
        let mut tx = self.pool().begin().await?;

        if let Some(key) = fingerprint {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(key)
                .execute(&mut *tx)
                .await?;

            if let Some(existing) = fetch_by_key(&mut tx, key).await? {
                let mut entry = NewAuditEntry::new("UPLOAD_DUP", "staff")
                    .target(existing.id)
                    .result("duplicate");
                if let Some((id, username)) = actor {
                    entry = entry.actor(id, username);
                }
                audit::insert(&mut *tx, entry).await?;
                tx.commit().await?;
                info!(artifact_id = %existing.id, "duplicate upload resolved idempotently");
                return Ok((existing, false));
            }
        }

        let attempt_number = self
            .supersede_prior(&mut tx, new)
            .await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO artifacts
                (id, raw_filename, canonical_filename, parsed_reg_no,
                 parsed_subject_code, exam_type, attempt_number, content_hash,
                 size_bytes, mime_type, disk_path, file_content,
                 workflow_status, idempotency_key, auto_processed,
                 uploaded_by, validated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                    'PENDING', $13, $14, $15, NOW())
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&new.raw_filename)
        .bind(&new.canonical_filename)
        .bind(&new.parsed_reg_no)
        .bind(&new.parsed_subject_code)
        .bind(new.exam_type.as_str())
        .bind(attempt_number)
        .bind(&new.content_hash)
        .bind(new.size_bytes)
        .bind(&new.mime_type)
        .bind(&new.disk_path)
        .bind(&new.file_content)
        .bind(fingerprint)
        .bind(new.auto_processed)
        .bind(new.uploaded_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return CoreError::Conflict("artifact already exists".to_string());
                }
            }
            CoreError::Internal(format!("failed to insert artifact: {e}"))
        })?;

        let artifact = map_row(&row)?;

        let mut entry = NewAuditEntry::new("UPLOAD", "staff")
            .target(artifact.id)
            .payload(serde_json::json!({
                "filename": new.raw_filename,
                "size": new.size_bytes,
                "attempt": attempt_number,
            }));
        if let Some((id, username)) = actor {
            entry = entry.actor(id, username);
        }
        audit::insert(&mut *tx, entry).await?;

        tx.commit().await?;
        info!(
            artifact_id = %artifact.id,
            attempt = attempt_number,
            "artifact created"
        );
        Ok((artifact, true))
    }

    /// Mark the latest non-superseded attempt for this tuple SUPERSEDED
    /// and return the attempt number the new row should carry.
    async fn supersede_prior(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        new: &NewArtifact,
    ) -> Result<i32> {
        let (Some(reg), Some(subject)) = (&new.parsed_reg_no, &new.parsed_subject_code) else {
            return Ok(1);
        };

        let prior = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM artifacts
            WHERE parsed_reg_no = $1
              AND parsed_subject_code = $2
              AND exam_type = $3
            ORDER BY attempt_number DESC
            LIMIT 1
            FOR UPDATE
            "#
        ))
        .bind(reg)
        .bind(subject)
        .bind(new.exam_type.as_str())
        .fetch_optional(&mut **tx)
        .await?;

        let Some(prior) = prior else {
            return Ok(1);
        };
        let prior = map_row(&prior)?;

        if prior.workflow_status != WorkflowStatus::Superseded {
            sqlx::query(
                "UPDATE artifacts SET workflow_status = 'SUPERSEDED' WHERE id = $1",
            )
            .bind(prior.id)
            .execute(&mut **tx)
            .await?;
            info!(artifact_id = %prior.id, "prior attempt superseded");
        }

        Ok(prior.attempt_number + 1)
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Artifact>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM artifacts WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(map_row).transpose()
    }

    pub async fn get_by_idempotency_key(&self, key: &str) -> Result<Option<Artifact>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM artifacts WHERE idempotency_key = $1"
        ))
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(map_row).transpose()
    }

    /// Artifacts visible on a student dashboard: every attempt for the
    /// mapped register number, newest first.
    pub async fn list_for_register(&self, register_number: &str) -> Result<Vec<Artifact>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM artifacts
            WHERE parsed_reg_no = $1 AND NOT tombstoned
            ORDER BY uploaded_at DESC
            "#
        ))
        .bind(register_number)
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(map_row).collect()
    }

    /// Paginated listing for staff/admin views.
    pub async fn list(&self, filter: &ListFilter, limit: i64, offset: i64) -> Result<ArtifactPage> {
        let where_clause = r#"
            WHERE ($1::text IS NULL OR workflow_status = $1)
              AND ($2::text IS NULL OR parsed_reg_no = $2)
              AND ($3::uuid IS NULL OR uploaded_by = $3)
              AND ($4::boolean IS NULL OR auto_processed = $4)
              AND ($5 OR workflow_status <> 'SUPERSEDED')
              AND NOT tombstoned
              AND (NOT $6 OR (parsed_reg_no IS NOT NULL AND NOT EXISTS (
                    SELECT 1 FROM username_register_map m
                    WHERE m.register_number = artifacts.parsed_reg_no)))
        "#;

        let status = filter.status.map(|s| s.as_str());
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM artifacts {where_clause}"
        ))
        .bind(status)
        .bind(&filter.register_number)
        .bind(filter.uploaded_by)
        .bind(filter.auto_processed)
        .bind(filter.include_superseded)
        .bind(filter.unassigned_only)
        .fetch_one(self.pool())
        .await?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {COLUMNS} FROM artifacts {where_clause}
            ORDER BY uploaded_at DESC
            LIMIT $7 OFFSET $8
            "#
        ))
        .bind(status)
        .bind(&filter.register_number)
        .bind(filter.uploaded_by)
        .bind(filter.auto_processed)
        .bind(filter.include_superseded)
        .bind(filter.unassigned_only)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await?;

        let artifacts = rows
            .iter()
            .map(|row| map_row(row).map(summarize))
            .collect::<Result<Vec<_>>>()?;

        Ok(ArtifactPage { total, artifacts })
    }

    /// Per-status counts for the stats endpoint.
    pub async fn stats(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query(
            "SELECT workflow_status, COUNT(*) AS n FROM artifacts GROUP BY workflow_status",
        )
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    row.try_get::<String, _>("workflow_status")?,
                    row.try_get::<i64, _>("n")?,
                ))
            })
            .collect()
    }

    /// Latest attempt for a `(register, subject, exam_type)` tuple,
    /// ignoring tombstoned rows. Used by the duplicate pre-check.
    pub async fn probe_tuple(
        &self,
        register_number: &str,
        subject_code: &str,
        exam_type: ExamType,
    ) -> Result<Option<TupleProbe>> {
        let row = sqlx::query(
            r#"
            SELECT workflow_status, attempt_number, uploaded_at
            FROM artifacts
            WHERE parsed_reg_no = $1
              AND parsed_subject_code = $2
              AND exam_type = $3
              AND NOT tombstoned
            ORDER BY attempt_number DESC
            LIMIT 1
            "#,
        )
        .bind(register_number)
        .bind(subject_code)
        .bind(exam_type.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(|row| {
            Ok(TupleProbe {
                status: WorkflowStatus::parse(&row.try_get::<String, _>("workflow_status")?)?,
                attempt_number: row.try_get("attempt_number")?,
                uploaded_at: row.try_get("uploaded_at")?,
            })
        })
        .transpose()
    }

    /// Optimistic-lock entry into the submission workflow. Zero affected
    /// rows means another submission already holds the artifact. The
    /// retry counter tracks attempts, so it moves here rather than on
    /// failure.
    pub async fn begin_submission(&self, id: Uuid) -> Result<i32> {
        let row = sqlx::query(
            r#"
            UPDATE artifacts
            SET workflow_status = 'SUBMITTING', submitted_at = NOW(),
                error_message = NULL, retry_count = retry_count + 1
            WHERE id = $1 AND workflow_status IN ('PENDING', 'FAILED')
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(row.try_get("retry_count")?),
            None => Err(CoreError::AlreadyInFlight),
        }
    }

    /// Record the LMS principal and assignment binding before the wire
    /// conversation starts.
    pub async fn set_lms_binding(
        &self,
        id: Uuid,
        moodle_user_id: i64,
        moodle_username: &str,
        course_id: i64,
        assignment_id: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE artifacts
            SET moodle_user_id = $2, moodle_username = $3,
                course_id = $4, assignment_id = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(moodle_user_id)
        .bind(moodle_username)
        .bind(course_id)
        .bind(assignment_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn set_draft_item(&self, id: Uuid, draft_item_id: i64) -> Result<()> {
        sqlx::query("UPDATE artifacts SET draft_item_id = $2 WHERE id = $1")
            .bind(id)
            .bind(draft_item_id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Terminal success: `SUBMITTING -> SUBMITTED_TO_LMS`.
    pub async fn complete_submission(&self, id: Uuid, submission_id: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE artifacts
            SET workflow_status = 'SUBMITTED_TO_LMS', submission_id = $2,
                completed_at = NOW(), error_message = NULL
            WHERE id = $1 AND workflow_status = 'SUBMITTING'
            "#,
        )
        .bind(id)
        .bind(submission_id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            warn!(artifact_id = %id, "complete_submission found no SUBMITTING row");
        }
        Ok(())
    }

    /// `SUBMITTING -> FAILED`. Returns the attempt count for backoff
    /// scheduling.
    pub async fn fail_submission(&self, id: Uuid, error_message: &str) -> Result<i32> {
        let row = sqlx::query(
            r#"
            UPDATE artifacts
            SET workflow_status = 'FAILED', error_message = $2
            WHERE id = $1 AND workflow_status = 'SUBMITTING'
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .bind(error_message)
        .fetch_optional(self.pool())
        .await?;

        match row {
            Some(row) => Ok(row.try_get("retry_count")?),
            None => {
                warn!(artifact_id = %id, "fail_submission found no SUBMITTING row");
                Ok(0)
            }
        }
    }

    /// Append one step record to the artifact's transaction log.
    pub async fn append_log(&self, id: Uuid, step: &str, detail: serde_json::Value) -> Result<()> {
        let entry = serde_json::json!({
            "step": step,
            "at": Utc::now(),
            "detail": detail,
        });
        sqlx::query(
            "UPDATE artifacts SET transaction_log = transaction_log || $2::jsonb WHERE id = $1",
        )
        .bind(id)
        .bind(entry)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Admin edit of parsed identity. Also rewrites the idempotency key so
    /// the corrected tuple deduplicates correctly from now on.
    pub async fn update_identity(
        &self,
        id: Uuid,
        register_number: &str,
        subject_code: &str,
        exam_type: ExamType,
        canonical_filename: &str,
    ) -> Result<Artifact> {
        let artifact = self
            .get_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("artifact {id}")))?;

        let key = identity::fingerprint(
            register_number,
            subject_code,
            exam_type,
            &artifact.content_hash,
        );

        let row = sqlx::query(&format!(
            r#"
            UPDATE artifacts
            SET parsed_reg_no = $2, parsed_subject_code = $3, exam_type = $4,
                canonical_filename = $5, idempotency_key = $6
            WHERE id = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(register_number)
        .bind(subject_code)
        .bind(exam_type.as_str())
        .bind(canonical_filename)
        .bind(&key)
        .fetch_one(self.pool())
        .await
        .map_err(|e| {
            if let Some(db_err) = e.as_database_error() {
                if db_err.is_unique_violation() {
                    return CoreError::Conflict(
                        "another artifact already carries this identity".to_string(),
                    );
                }
            }
            CoreError::Internal(format!("failed to update artifact: {e}"))
        })?;

        map_row(&row)
    }

    /// Admin reset after a terminal failure: back to `PENDING` with a
    /// clean error state.
    pub async fn reset_status(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE artifacts
            SET workflow_status = 'PENDING', error_message = NULL, retry_count = 0,
                draft_item_id = NULL, submission_id = NULL, completed_at = NULL
            WHERE id = $1 AND workflow_status IN ('FAILED', 'SUBMITTING')
            "#,
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::Conflict(
                "only FAILED or stuck SUBMITTING artifacts can be reset".to_string(),
            ));
        }
        Ok(())
    }

    /// Soft delete: supersede with a tombstone so the row stays auditable
    /// but vanishes from every listing.
    pub async fn soft_delete(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE artifacts SET workflow_status = 'SUPERSEDED', tombstoned = TRUE WHERE id = $1",
        )
        .bind(id)
        .execute(self.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("artifact {id}")));
        }
        Ok(())
    }

    /// Hard delete of every artifact row. Refuses without the confirming
    /// flag; the caller audits the purge.
    pub async fn purge_all(&self, confirm: bool) -> Result<u64> {
        if !confirm {
            return Err(CoreError::Validation(
                "purge-all requires the confirm flag".to_string(),
            ));
        }
        let result = sqlx::query("DELETE FROM artifacts")
            .execute(self.pool())
            .await?;
        warn!(purged = result.rows_affected(), "purged all artifacts");
        Ok(result.rows_affected())
    }
}

async fn fetch_by_key(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
) -> Result<Option<Artifact>> {
    let row = sqlx::query(&format!(
        "SELECT {COLUMNS} FROM artifacts WHERE idempotency_key = $1"
    ))
    .bind(key)
    .fetch_optional(&mut **tx)
    .await?;
    row.as_ref().map(map_row).transpose()
}

fn summarize(artifact: Artifact) -> ArtifactSummary {
    ArtifactSummary {
        id: artifact.id,
        filename: artifact.canonical_filename,
        register_number: artifact.parsed_reg_no,
        subject_code: artifact.parsed_subject_code,
        exam_type: artifact.exam_type,
        attempt_number: artifact.attempt_number,
        status: artifact.workflow_status,
        auto_processed: artifact.auto_processed,
        uploaded_at: artifact.uploaded_at,
    }
}

fn map_row(row: &PgRow) -> Result<Artifact> {
    let read = |e: sqlx::Error| CoreError::Internal(format!("failed to read artifact row: {e}"));
    Ok(Artifact {
        id: row.try_get("id").map_err(read)?,
        raw_filename: row.try_get("raw_filename").map_err(read)?,
        canonical_filename: row.try_get("canonical_filename").map_err(read)?,
        parsed_reg_no: row.try_get("parsed_reg_no").map_err(read)?,
        parsed_subject_code: row.try_get("parsed_subject_code").map_err(read)?,
        exam_type: ExamType::parse(&row.try_get::<String, _>("exam_type").map_err(read)?)?,
        attempt_number: row.try_get("attempt_number").map_err(read)?,
        content_hash: row.try_get("content_hash").map_err(read)?,
        size_bytes: row.try_get("size_bytes").map_err(read)?,
        mime_type: row.try_get("mime_type").map_err(read)?,
        disk_path: row.try_get("disk_path").map_err(read)?,
        moodle_user_id: row.try_get("moodle_user_id").map_err(read)?,
        moodle_username: row.try_get("moodle_username").map_err(read)?,
        course_id: row.try_get("course_id").map_err(read)?,
        assignment_id: row.try_get("assignment_id").map_err(read)?,
        draft_item_id: row.try_get("draft_item_id").map_err(read)?,
        submission_id: row.try_get("submission_id").map_err(read)?,
        workflow_status: WorkflowStatus::parse(
            &row.try_get::<String, _>("workflow_status").map_err(read)?,
        )?,
        idempotency_key: row.try_get("idempotency_key").map_err(read)?,
        transaction_log: row.try_get("transaction_log").map_err(read)?,
        error_message: row.try_get("error_message").map_err(read)?,
        retry_count: row.try_get("retry_count").map_err(read)?,
        auto_processed: row.try_get("auto_processed").map_err(read)?,
        tombstoned: row.try_get("tombstoned").map_err(read)?,
        uploaded_by: row.try_get("uploaded_by").map_err(read)?,
        uploaded_at: row.try_get("uploaded_at").map_err(read)?,
        validated_at: row.try_get("validated_at").map_err(read)?,
        submitted_at: row.try_get("submitted_at").map_err(read)?,
        completed_at: row.try_get("completed_at").map_err(read)?,
    })
}
