//! Notification dispatch.
//!
//! The mail channel itself is an external collaborator; the core only
//! calls `notify(kind, to, metadata)` on the [`Notifier`] port. A SendGrid
//! HTTP implementation is provided for deployments with an API key; the
//! fallback implementation logs and drops. Failures are best-effort
//! everywhere: a broken mail channel never fails an upload or submission.

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::database::repositories::{AuditRepository, MappingsRepository};
use crate::error::Result;
use crate::lms::MoodleClient;
use crate::model::{Artifact, NewAuditEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    PaperUploaded,
    SubmitSuccess,
    SubmitFailed,
    PayloadRejected,
}

impl NotificationKind {
    pub fn subject(&self) -> &'static str {
        match self {
            NotificationKind::PaperUploaded => "Your answer paper has been uploaded",
            NotificationKind::SubmitSuccess => "Your paper was submitted to the LMS",
            NotificationKind::SubmitFailed => "Your paper submission needs attention",
            NotificationKind::PayloadRejected => "A paper was rejected by the LMS",
        }
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        kind: NotificationKind,
        to: &str,
        metadata: serde_json::Value,
    ) -> Result<()>;
}

/// SendGrid v3 mail-send implementation.
pub struct SendGridNotifier {
    api_key: String,
    from_email: String,
    from_name: String,
    http: reqwest::Client,
}

impl SendGridNotifier {
    pub fn new(api_key: &str, from_email: &str, from_name: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            from_email: from_email.to_string(),
            from_name: from_name.to_string(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client construction cannot fail"),
        }
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        to: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        let body = json!({
            "personalizations": [{"to": [{"email": to}]}],
            "from": {"email": self.from_email, "name": self.from_name},
            "subject": kind.subject(),
            "content": [{
                "type": "text/plain",
                "value": serde_json::to_string_pretty(&metadata)?,
            }],
        });

        let response = self
            .http
            .post("https://api.sendgrid.com/v3/mail/send")
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(crate::error::CoreError::internal)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), to, "mail delivery rejected");
        }
        Ok(())
    }
}

/// Fallback when no mail channel is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        kind: NotificationKind,
        to: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        info!(?kind, to, %metadata, "notification (mail channel not configured)");
        Ok(())
    }
}

/// Resolves a student's email through the username map and the LMS admin
/// token, then dispatches. Every skip reason is audited; nothing here
/// can fail the caller.
pub struct StudentNotifier {
    mappings: MappingsRepository,
    audit: AuditRepository,
    lms: MoodleClient,
    notifier: std::sync::Arc<dyn Notifier>,
    admin_token: Option<String>,
}

impl StudentNotifier {
    pub fn new(
        mappings: MappingsRepository,
        audit: AuditRepository,
        lms: MoodleClient,
        notifier: std::sync::Arc<dyn Notifier>,
        admin_token: Option<String>,
    ) -> Self {
        Self {
            mappings,
            audit,
            lms,
            notifier,
            admin_token,
        }
    }

    /// Send to an explicit address, e.g. the staff alert mailbox.
    pub async fn notify_direct(
        &self,
        kind: NotificationKind,
        to: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        self.notifier.notify(kind, to, metadata).await
    }

    pub async fn notify_student(&self, kind: NotificationKind, artifact: &Artifact) {
        if let Err(err) = self.try_notify_student(kind, artifact).await {
            warn!(artifact_id = %artifact.id, error = %err, "student notification failed");
        }
    }

    async fn try_notify_student(&self, kind: NotificationKind, artifact: &Artifact) -> Result<()> {
        let Some(register) = &artifact.parsed_reg_no else {
            return Ok(());
        };

        let Some(username) = self.mappings.username_for_register(register).await? else {
            self.audit_skip(artifact, "no username mapping for register")
                .await;
            return Ok(());
        };

        let Some(admin_token) = &self.admin_token else {
            self.audit_skip(artifact, "Moodle admin token not configured")
                .await;
            return Ok(());
        };

        let email = match self
            .lms
            .user_by_field(admin_token, "username", &username)
            .await
        {
            Ok(Some(user)) => user.email,
            Ok(None) => None,
            Err(err) => {
                warn!(username, error = %err, "Moodle user lookup failed");
                None
            }
        };

        let Some(email) = email else {
            self.audit_skip(artifact, "no email resolvable for student")
                .await;
            return Ok(());
        };

        self.notifier
            .notify(
                kind,
                &email,
                json!({
                    "filename": artifact.canonical_filename,
                    "register_number": register,
                    "subject_code": artifact.parsed_subject_code,
                    "exam_type": artifact.exam_type,
                    "status": artifact.workflow_status,
                }),
            )
            .await
    }

    async fn audit_skip(&self, artifact: &Artifact, reason: &str) {
        let entry = NewAuditEntry::new("student_notification_skipped", "system")
            .target(artifact.id)
            .result(reason);
        if let Err(err) = self.audit.log(entry).await {
            warn!(error = %err, "failed to audit notification skip");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        notifier
            .notify(
                NotificationKind::SubmitSuccess,
                "student@university.edu",
                json!({"filename": "212222240047_19AI405_CIA1.pdf"}),
            )
            .await
            .unwrap();
    }

    #[test]
    fn kinds_have_distinct_subjects() {
        let subjects = [
            NotificationKind::PaperUploaded.subject(),
            NotificationKind::SubmitSuccess.subject(),
            NotificationKind::SubmitFailed.subject(),
            NotificationKind::PayloadRejected.subject(),
        ];
        for (i, a) in subjects.iter().enumerate() {
            for b in subjects.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }
}
