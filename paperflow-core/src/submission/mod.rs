//! Submission orchestration.
//!
//! Drives a `PENDING`/`FAILED` artifact through the multi-step LMS
//! conversation on behalf of an authenticated student. Entry is a
//! conditional-update CAS, so an artifact has at most one in-flight
//! attempt whether it came from the interactive endpoint or the retry
//! worker. The wire steps run on a detached task: a client that hangs up
//! mid-conversation cannot leave the LMS in a half-state that the
//! database never learns about.

pub mod worker;

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::TokenVault;
use crate::database::repositories::{
    ArtifactsRepository, AuditRepository, MappingsRepository, QueueRepository, SessionsRepository,
};
use crate::error::{CoreError, Result};
use crate::lms::{LmsError, LmsErrorKind, MoodleClient};
use crate::model::{Artifact, NewAuditEntry, StudentSession, WorkflowStatus};
use crate::notify::{NotificationKind, StudentNotifier};
use crate::storage::ArtifactStore;

pub const MAX_RETRIES: i32 = 5;
const BACKOFF_CAP_SECS: i64 = 3600;

/// Exponential backoff, capped at one hour.
pub fn backoff_seconds(retry_count: i32) -> i64 {
    let exp = retry_count.clamp(0, 30) as u32;
    (2i64.saturating_pow(exp)).min(BACKOFF_CAP_SECS)
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub artifact_id: Uuid,
    pub submission_id: String,
}

#[derive(Clone)]
pub struct Orchestrator {
    artifacts: ArtifactsRepository,
    mappings: MappingsRepository,
    sessions: SessionsRepository,
    queue: QueueRepository,
    audit: AuditRepository,
    store: ArtifactStore,
    lms: MoodleClient,
    vault: TokenVault,
    notifier: Arc<StudentNotifier>,
    staff_alert_email: Option<String>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        artifacts: ArtifactsRepository,
        mappings: MappingsRepository,
        sessions: SessionsRepository,
        queue: QueueRepository,
        audit: AuditRepository,
        store: ArtifactStore,
        lms: MoodleClient,
        vault: TokenVault,
        notifier: Arc<StudentNotifier>,
        staff_alert_email: Option<String>,
    ) -> Self {
        Self {
            artifacts,
            mappings,
            sessions,
            queue,
            audit,
            store,
            lms,
            vault,
            notifier,
            staff_alert_email,
        }
    }

    /// Submit an artifact for the student behind `session`.
    ///
    /// Preconditions checked here; the wire conversation itself runs
    /// detached and is awaited, so the outcome lands in the database even
    /// if the caller has gone away.
    pub async fn submit(
        &self,
        artifact_id: Uuid,
        session: &StudentSession,
    ) -> Result<SubmissionOutcome> {
        let artifact = self
            .artifacts
            .get_by_id(artifact_id)
            .await?
            .filter(|a| !a.tombstoned)
            .ok_or_else(|| CoreError::NotFound(format!("artifact {artifact_id}")))?;

        self.check_preconditions(&artifact, session).await?;

        let mapping = self
            .mappings
            .get_active_subject_mapping(
                artifact.parsed_subject_code.as_deref().unwrap_or_default(),
                artifact.exam_type,
            )
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "no active subject mapping for ({}, {})",
                    artifact.parsed_subject_code.as_deref().unwrap_or("?"),
                    artifact.exam_type
                ))
            })?;

        // Step 1: optimistic lock. Zero affected rows means another
        // attempt (interactive or worker) already holds the artifact.
        self.artifacts.begin_submission(artifact.id).await?;

        self.artifacts
            .set_lms_binding(
                artifact.id,
                session.moodle_user_id,
                &session.moodle_username,
                mapping.moodle_course_id,
                mapping.moodle_assignment_id,
            )
            .await?;

        // Steps 2-7 detached: client cancellation must not strand the
        // artifact in SUBMITTING with the LMS half-updated.
        let this = self.clone();
        let session = session.clone();
        let assignment_id = mapping.moodle_assignment_id;
        let handle = tokio::spawn(async move {
            this.run_wire_steps(artifact, session, assignment_id).await
        });

        handle
            .await
            .map_err(|e| CoreError::Internal(format!("submission task panicked: {e}")))?
    }

    async fn check_preconditions(
        &self,
        artifact: &Artifact,
        session: &StudentSession,
    ) -> Result<()> {
        match artifact.workflow_status {
            status if status.is_submittable() => {}
            WorkflowStatus::Submitting => return Err(CoreError::AlreadyInFlight),
            WorkflowStatus::SubmittedToLms => {
                return Err(CoreError::Conflict(
                    "artifact was already submitted to the LMS".to_string(),
                ))
            }
            WorkflowStatus::Superseded => {
                return Err(CoreError::Conflict(
                    "artifact was superseded by a newer attempt".to_string(),
                ))
            }
            _ => unreachable!("is_submittable covers the remaining states"),
        }

        let mapped_register = self
            .mappings
            .register_for_username(&session.moodle_username)
            .await?
            .ok_or_else(|| {
                CoreError::Authz("no register number mapped to this account".to_string())
            })?;

        if artifact.parsed_reg_no.as_deref() != Some(mapped_register.as_str()) {
            return Err(CoreError::Authz(
                "artifact does not belong to this student".to_string(),
            ));
        }
        Ok(())
    }

    /// Steps 2-7 of the protocol. Every LMS step is recorded in the
    /// artifact's transaction log before the next one starts.
    async fn run_wire_steps(
        &self,
        artifact: Artifact,
        session: StudentSession,
        assignment_id: i64,
    ) -> Result<SubmissionOutcome> {
        let content = match self.store.get(&artifact).await {
            Ok(content) => content,
            Err(err) => {
                return self
                    .handle_infrastructure_failure(&artifact, &session, err)
                    .await;
            }
        };

        // The plaintext token lives only inside this scope.
        let token = match self.vault.decrypt(&session.encrypted_token) {
            Ok(token) => token,
            Err(err) => {
                return self
                    .handle_lms_failure(
                        &artifact,
                        &session,
                        LmsError {
                            kind: LmsErrorKind::AuthInvalid,
                            errorcode: None,
                            message: err.to_string(),
                        },
                    )
                    .await;
            }
        };

        let item_id = match self
            .lms
            .upload_file(&token, content, &artifact.canonical_filename)
            .await
        {
            Ok(item_id) => item_id,
            Err(err) => return self.handle_lms_failure(&artifact, &session, err).await,
        };
        self.artifacts.set_draft_item(artifact.id, item_id).await?;
        self.log_step(&artifact, "upload_file", json!({"item_id": item_id}))
            .await;

        if let Err(err) = self
            .lms
            .save_submission(&token, assignment_id, item_id)
            .await
        {
            return self.handle_lms_failure(&artifact, &session, err).await;
        }
        self.log_step(
            &artifact,
            "save_submission",
            json!({"assignment_id": assignment_id, "item_id": item_id}),
        )
        .await;

        let submission_id = match self.lms.submit_for_grading(&token, assignment_id).await {
            // Stock Moodle omits the id; the draft item is the one
            // LMS-side handle we always hold.
            Ok(reported) => reported.unwrap_or(item_id).to_string(),
            Err(err) => return self.handle_lms_failure(&artifact, &session, err).await,
        };
        self.log_step(
            &artifact,
            "submit_for_grading",
            json!({"submission_id": submission_id}),
        )
        .await;

        self.artifacts
            .complete_submission(artifact.id, &submission_id)
            .await?;

        self.audit(
            NewAuditEntry::new("SUBMIT_SUCCESS", "student")
                .actor(session.moodle_user_id, session.moodle_username.clone())
                .target(artifact.id)
                .payload(json!({"submission_id": submission_id})),
        )
        .await;

        info!(
            artifact_id = %artifact.id,
            submission_id = %submission_id,
            "submission completed"
        );

        self.notifier
            .notify_student(NotificationKind::SubmitSuccess, &artifact)
            .await;

        Ok(SubmissionOutcome {
            artifact_id: artifact.id,
            submission_id,
        })
    }

    /// Classified failure handling for steps 4-6.
    async fn handle_lms_failure(
        &self,
        artifact: &Artifact,
        session: &StudentSession,
        err: LmsError,
    ) -> Result<SubmissionOutcome> {
        let retry_count = self
            .artifacts
            .fail_submission(artifact.id, &err.to_string())
            .await?;
        self.log_step(
            artifact,
            "failed",
            json!({"kind": format!("{:?}", err.kind), "message": err.message}),
        )
        .await;

        self.audit(
            NewAuditEntry::new("SUBMIT_FAIL", "student")
                .actor(session.moodle_user_id, session.moodle_username.clone())
                .target(artifact.id)
                .payload(json!({
                    "kind": format!("{:?}", err.kind),
                    "errorcode": err.errorcode,
                }))
                .result("error"),
        )
        .await;

        match err.kind {
            LmsErrorKind::Transient | LmsErrorKind::Authz | LmsErrorKind::Unknown => {
                let next_attempt = Utc::now() + ChronoDuration::seconds(backoff_seconds(retry_count));
                self.queue
                    .enqueue(
                        artifact.id,
                        &session.id,
                        retry_count,
                        next_attempt,
                        &err.to_string(),
                    )
                    .await?;
                info!(
                    artifact_id = %artifact.id,
                    retry_count,
                    next_attempt = %next_attempt,
                    "submission queued for retry"
                );
            }
            LmsErrorKind::PayloadReject => {
                // Terminal: the file itself is the problem; staff has to
                // step in.
                if let Some(staff_email) = &self.staff_alert_email {
                    let _ = self
                        .notifier
                        .notify_direct(
                            NotificationKind::PayloadRejected,
                            staff_email,
                            json!({
                                "artifact_id": artifact.id,
                                "filename": artifact.canonical_filename,
                                "error": err.message,
                            }),
                        )
                        .await;
                }
            }
            LmsErrorKind::AuthInvalid => {
                // The LMS token is dead; so is the session built on it.
                if let Err(delete_err) = self.sessions.delete(&session.id).await {
                    warn!(error = %delete_err, "failed to delete invalid session");
                }
            }
        }

        self.notifier
            .notify_student(NotificationKind::SubmitFailed, artifact)
            .await;

        Err(err.into())
    }

    /// Storage failures before the LMS conversation: revert to FAILED so
    /// the student sees an actionable state.
    async fn handle_infrastructure_failure(
        &self,
        artifact: &Artifact,
        session: &StudentSession,
        err: CoreError,
    ) -> Result<SubmissionOutcome> {
        error!(artifact_id = %artifact.id, error = %err, "submission aborted before LMS contact");
        self.artifacts
            .fail_submission(artifact.id, &err.to_string())
            .await?;
        self.audit(
            NewAuditEntry::new("SUBMIT_FAIL", "student")
                .actor(session.moodle_user_id, session.moodle_username.clone())
                .target(artifact.id)
                .payload(json!({"kind": err.kind()}))
                .result("error"),
        )
        .await;
        Err(err)
    }

    async fn log_step(&self, artifact: &Artifact, step: &str, detail: serde_json::Value) {
        if let Err(err) = self.artifacts.append_log(artifact.id, step, detail).await {
            warn!(artifact_id = %artifact.id, error = %err, "failed to append transaction log");
        }
    }

    async fn audit(&self, entry: NewAuditEntry) {
        if let Err(err) = self.audit.log(entry).await {
            warn!(error = %err, "failed to write audit entry");
        }
    }

    pub(crate) fn sessions(&self) -> &SessionsRepository {
        &self.sessions
    }

    pub(crate) fn queue(&self) -> &QueueRepository {
        &self.queue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_seconds(0), 1);
        assert_eq!(backoff_seconds(1), 2);
        assert_eq!(backoff_seconds(2), 4);
        assert_eq!(backoff_seconds(5), 32);
        assert_eq!(backoff_seconds(11), 2048);
        assert_eq!(backoff_seconds(12), 3600);
        assert_eq!(backoff_seconds(30), 3600);
    }
}
