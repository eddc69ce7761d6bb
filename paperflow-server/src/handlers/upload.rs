use axum::{
    extract::{Multipart, Query, State},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use paperflow_core::database::repositories::ListFilter;
use paperflow_core::identity;
use paperflow_core::model::{
    Artifact, ExamType, NewArtifact, NewAuditEntry, StaffUser, WorkflowStatus,
};
use paperflow_core::notify::NotificationKind;

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_register_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parsed_subject_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exam_type: Option<ExamType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_number: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    pub duplicate: bool,
}

impl UploadResponse {
    fn failure(filename: Option<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            filename,
            artifact_id: None,
            parsed_register_number: None,
            parsed_subject_code: None,
            exam_type: None,
            attempt_number: None,
            status: None,
            duplicate: false,
        }
    }

    fn from_artifact(artifact: &Artifact, created: bool) -> Self {
        Self {
            success: true,
            message: if created {
                "file uploaded".to_string()
            } else {
                "identical file already uploaded".to_string()
            },
            filename: Some(artifact.canonical_filename.clone()),
            artifact_id: Some(artifact.id),
            parsed_register_number: artifact.parsed_reg_no.clone(),
            parsed_subject_code: artifact.parsed_subject_code.clone(),
            exam_type: Some(artifact.exam_type),
            attempt_number: Some(artifact.attempt_number),
            status: Some(artifact.workflow_status),
            duplicate: !created,
        }
    }
}

/// One file drawn from a multipart request.
pub(crate) struct IncomingFile {
    pub filename: String,
    pub content: Vec<u8>,
}

pub(crate) struct UploadForm {
    pub files: Vec<IncomingFile>,
    pub exam_type: Option<ExamType>,
    pub flexible: bool,
}

pub(crate) async fn read_multipart(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm {
        files: Vec::new(),
        exam_type: None,
        flexible: false,
    };

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::validation(format!("malformed multipart body: {e}")))?
    {
        match field.name().unwrap_or_default() {
            "file" | "file[]" | "files" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let content = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::validation(format!("failed to read file: {e}")))?
                    .to_vec();
                form.files.push(IncomingFile { filename, content });
            }
            "exam_type" => {
                let value = field.text().await.unwrap_or_default();
                if !value.trim().is_empty() {
                    form.exam_type =
                        Some(ExamType::parse(&value).map_err(AppError::from)?);
                }
            }
            "flexible" => {
                let value = field.text().await.unwrap_or_default();
                form.flexible = matches!(value.trim(), "1" | "true" | "yes");
            }
            _ => {}
        }
    }

    Ok(form)
}

/// The single ingestion path shared by single, bulk and scan uploads:
/// validate bytes, resolve identity, persist to both backends, record.
pub(crate) async fn ingest(
    state: &AppState,
    staff: &StaffUser,
    file: IncomingFile,
    exam_type: Option<ExamType>,
    flexible: bool,
) -> Result<(Artifact, bool), AppError> {
    if file.filename.is_empty() {
        return Err(AppError::validation("filename is required"));
    }

    let mime = identity::validate_content(&file.content, state.config.max_file_size_bytes())
        .map_err(AppError::from)?;
    let extension = identity::extension_for_mime(mime);
    let raw_filename = identity::sanitize_filename(&file.filename);

    let (reg_no, subject, file_exam_type) = if flexible {
        match identity::try_parse_filename(&raw_filename) {
            Some(parsed) => (
                Some(parsed.register_number),
                Some(parsed.subject_code),
                parsed.exam_type,
            ),
            None => (None, None, None),
        }
    } else {
        let parsed = identity::parse_filename(&raw_filename).map_err(AppError::from)?;
        (
            Some(parsed.register_number),
            Some(parsed.subject_code),
            parsed.exam_type,
        )
    };

    // Request parameter wins, then the filename segment, then the default.
    let exam_type = exam_type.or(file_exam_type).unwrap_or_default();

    let canonical_filename = match (&reg_no, &subject) {
        (Some(reg), Some(code)) => identity::canonical_filename(reg, code, exam_type, extension),
        _ => raw_filename.clone(),
    };

    store_and_record(
        state,
        staff,
        file.content,
        raw_filename,
        canonical_filename,
        reg_no,
        subject,
        exam_type,
        mime,
        extension,
        false,
    )
    .await
}

/// Dual-write and insert. A disk failure is tolerated as long as the row
/// (with its blob) commits; a failed insert rolls the disk write back.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn store_and_record(
    state: &AppState,
    staff: &StaffUser,
    content: Vec<u8>,
    raw_filename: String,
    canonical_filename: String,
    reg_no: Option<String>,
    subject: Option<String>,
    exam_type: ExamType,
    mime: &str,
    extension: &str,
    auto_processed: bool,
) -> Result<(Artifact, bool), AppError> {
    let stored = state.store.put(&content, extension).await;
    let content_hash = stored
        .as_ref()
        .map(|s| s.hash.clone())
        .unwrap_or_else(|| identity::content_hash(&content));

    let new = NewArtifact {
        raw_filename,
        canonical_filename,
        parsed_reg_no: reg_no,
        parsed_subject_code: subject,
        exam_type,
        content_hash,
        size_bytes: content.len() as i64,
        mime_type: mime.to_string(),
        disk_path: stored
            .as_ref()
            .map(|s| s.path.to_string_lossy().to_string()),
        file_content: content,
        auto_processed,
        uploaded_by: Some(staff.id),
    };

    let result = state
        .artifacts
        .create(new, Some((&staff.id.to_string(), &staff.username)))
        .await;

    match result {
        Ok((artifact, created)) => {
            if created {
                let notifier = state.notifier.clone();
                let snapshot = artifact.clone();
                tokio::spawn(async move {
                    notifier
                        .notify_student(NotificationKind::PaperUploaded, &snapshot)
                        .await;
                });
            }
            Ok((artifact, created))
        }
        Err(err) => {
            // Roll back the disk half of the dual write.
            let disk_failed = stored.is_none();
            if let Some(stored) = stored {
                if let Err(cleanup) = state.store.files().remove(&stored.path).await {
                    warn!(error = %cleanup, "failed to clean up disk file after insert failure");
                }
            }
            if disk_failed && matches!(err, paperflow_core::CoreError::Internal(_)) {
                return Err(paperflow_core::CoreError::StorageUnavailable(
                    "neither disk nor database accepted the upload".to_string(),
                )
                .into());
            }
            Err(err.into())
        }
    }
}

/// POST /upload/single
pub async fn upload_single(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    multipart: Multipart,
) -> AppResult<Json<UploadResponse>> {
    let mut form = read_multipart(multipart).await?;
    let file = match form.files.pop() {
        Some(file) if form.files.is_empty() => file,
        _ => return Err(AppError::validation("exactly one file is required")),
    };

    let filename = file.filename.clone();
    let outcome = ingest(&state, &staff, file, form.exam_type, form.flexible).await;

    let _ = state
        .audit
        .log(
            NewAuditEntry::new("upload_single", "staff")
                .actor(staff.id, staff.username.clone())
                .payload(json!({"filename": filename}))
                .result(if outcome.is_ok() { "ok" } else { "error" }),
        )
        .await;

    let (artifact, created) = outcome?;
    Ok(Json(UploadResponse::from_artifact(&artifact, created)))
}

#[derive(Debug, Serialize)]
pub struct BulkUploadResponse {
    pub total_files: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<UploadResponse>,
}

/// POST /upload/bulk. Each file is processed in its own transaction, so
/// one bad scan never poisons the batch.
pub async fn upload_bulk(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    multipart: Multipart,
) -> AppResult<Json<BulkUploadResponse>> {
    let form = read_multipart(multipart).await?;
    if form.files.is_empty() {
        return Err(AppError::validation("at least one file is required"));
    }

    let total_files = form.files.len();
    let mut results = Vec::with_capacity(total_files);
    let mut successful = 0;

    for file in form.files {
        let filename = file.filename.clone();
        match ingest(&state, &staff, file, form.exam_type, form.flexible).await {
            Ok((artifact, created)) => {
                successful += 1;
                results.push(UploadResponse::from_artifact(&artifact, created));
            }
            Err(err) => {
                results.push(UploadResponse::failure(Some(filename), err.message));
            }
        }
    }

    let failed = total_files - successful;
    let _ = state
        .audit
        .log(
            NewAuditEntry::new("upload_bulk", "staff")
                .actor(staff.id, staff.username.clone())
                .payload(json!({
                    "total": total_files,
                    "successful": successful,
                    "failed": failed,
                })),
        )
        .await;

    Ok(Json(BulkUploadResponse {
        total_files,
        successful,
        failed,
        results,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TupleItem {
    pub reg_no: String,
    pub subject_code: String,
    #[serde(default)]
    pub exam_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TupleBatch {
    pub items: Vec<TupleItem>,
}

/// POST /upload/check-duplicates: batch probe ahead of a bulk upload.
pub async fn check_duplicates(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Json(batch): Json<TupleBatch>,
) -> AppResult<Json<serde_json::Value>> {
    let mut results = Vec::with_capacity(batch.items.len());
    for item in batch.items {
        let reg_no = item.reg_no.trim().to_string();
        let subject = item.subject_code.trim().to_ascii_uppercase();
        let exam_type = match item.exam_type.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                ExamType::parse(raw).map_err(AppError::from)?
            }
            _ => ExamType::default(),
        };

        if reg_no.is_empty() || subject.is_empty() {
            results.push(json!({
                "reg_no": reg_no,
                "subject_code": subject,
                "exists": false,
            }));
            continue;
        }

        let probe = state
            .artifacts
            .probe_tuple(&reg_no, &subject, exam_type)
            .await
            .map_err(AppError::from)?;

        results.push(match probe {
            Some(found) => json!({
                "reg_no": reg_no,
                "subject_code": subject,
                "exam_type": exam_type,
                "exists": true,
                "status": found.status,
                "max_attempt": found.attempt_number,
                "uploaded_at": found.uploaded_at,
            }),
            None => json!({
                "reg_no": reg_no,
                "subject_code": subject,
                "exam_type": exam_type,
                "exists": false,
                "max_attempt": 0,
            }),
        });
    }

    Ok(Json(json!({"results": results})))
}

/// POST /upload/validate-mappings: are the subject and register mapped?
pub async fn validate_mappings(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Json(batch): Json<TupleBatch>,
) -> AppResult<Json<serde_json::Value>> {
    let mut results = Vec::with_capacity(batch.items.len());
    for item in batch.items {
        let reg_no = item.reg_no.trim().to_string();
        let subject = item.subject_code.trim().to_ascii_uppercase();
        let exam_type = match item.exam_type.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                ExamType::parse(raw).map_err(AppError::from)?
            }
            _ => ExamType::default(),
        };

        let subject_mapped = state
            .mappings
            .get_active_subject_mapping(&subject, exam_type)
            .await
            .map_err(AppError::from)?
            .is_some();
        let student_mapped = !reg_no.is_empty()
            && state
                .mappings
                .register_is_mapped(&reg_no)
                .await
                .map_err(AppError::from)?;

        results.push(json!({
            "reg_no": reg_no,
            "subject_code": subject,
            "exam_type": exam_type,
            "subject_mapped": subject_mapped,
            "student_mapped": student_mapped,
        }));
    }

    Ok(Json(json!({"results": results})))
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub include_superseded: bool,
}

fn default_limit() -> i64 {
    50
}

/// GET /upload/all
pub async fn list_all(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let filter = ListFilter {
        include_superseded: page.include_superseded,
        ..Default::default()
    };
    list_page(&state, filter, page).await
}

/// GET /upload/pending
pub async fn list_pending(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let filter = ListFilter {
        status: Some(WorkflowStatus::Pending),
        ..Default::default()
    };
    list_page(&state, filter, page).await
}

/// GET /upload/auto-processed
pub async fn list_auto_processed(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Query(page): Query<PageQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let filter = ListFilter {
        auto_processed: Some(true),
        ..Default::default()
    };
    list_page(&state, filter, page).await
}

async fn list_page(
    state: &AppState,
    filter: ListFilter,
    page: PageQuery,
) -> AppResult<Json<serde_json::Value>> {
    let limit = page.limit.clamp(1, 500);
    let listing = state
        .artifacts
        .list(&filter, limit, page.offset.max(0))
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({
        "total": listing.total,
        "limit": limit,
        "offset": page.offset.max(0),
        "artifacts": listing.artifacts,
    })))
}

/// GET /upload/stats
pub async fn stats(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
) -> AppResult<Json<serde_json::Value>> {
    let stats = state.artifacts.stats().await.map_err(AppError::from)?;
    let total: i64 = stats.iter().map(|(_, n)| n).sum();
    let by_status: serde_json::Map<String, serde_json::Value> = stats
        .into_iter()
        .map(|(status, n)| (status, json!(n)))
        .collect();

    Ok(Json(json!({"stats": by_status, "total": total})))
}
