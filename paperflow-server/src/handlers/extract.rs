use axum::{
    extract::{Multipart, State},
    Extension, Json,
};
use serde_json::json;

use paperflow_core::extraction::Resolution;
use paperflow_core::identity;
use paperflow_core::model::{NewAuditEntry, StaffUser};

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};
use crate::handlers::upload::{read_multipart, store_and_record};

/// GET /extract/status
pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let enabled = state.extractor.is_enabled();
    let healthy = if enabled {
        state.extractor.health().await
    } else {
        false
    };
    Json(json!({
        "extraction_available": enabled,
        "service_healthy": healthy,
        "mode": if enabled { "remote" } else { "disabled" },
    }))
}

/// POST /extract/scan-upload
///
/// One-shot scanner pipeline: raw file in, AI extraction, rename to the
/// canonical form, artifact out. Used by the scanner agent sitting next
/// to the copier.
pub async fn scan_upload(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    multipart: Multipart,
) -> AppResult<Json<serde_json::Value>> {
    let mut form = read_multipart(multipart).await?;
    let file = match form.files.pop() {
        Some(file) if form.files.is_empty() => file,
        _ => return Err(AppError::validation("exactly one file is required")),
    };
    if file.filename.is_empty() {
        return Err(AppError::validation("filename is required"));
    }

    let mime = identity::validate_content(&file.content, state.config.max_file_size_bytes())
        .map_err(AppError::from)?;
    let extension = identity::extension_for_mime(mime);
    let raw_filename = identity::sanitize_filename(&file.filename);
    let exam_type = form.exam_type.unwrap_or_default();

    let resolution = state.extractor.resolve(&file.content, &raw_filename).await;

    let (reg_no, subject, canonical, auto_processed, confidences) = match &resolution {
        Resolution::Remote(inferred) => (
            Some(inferred.register_number.clone()),
            Some(inferred.subject_code.clone()),
            identity::canonical_filename(
                &inferred.register_number,
                &inferred.subject_code,
                exam_type,
                extension,
            ),
            true,
            json!({
                "register_confidence": inferred.register_confidence,
                "subject_confidence": inferred.subject_confidence,
            }),
        ),
        Resolution::Filename(parsed) => (
            Some(parsed.register_number.clone()),
            Some(parsed.subject_code.clone()),
            identity::canonical_filename(
                &parsed.register_number,
                &parsed.subject_code,
                exam_type,
                extension,
            ),
            false,
            json!(null),
        ),
        // Low confidence or nothing recognisable: keep the original name
        // and park the artifact for manual review.
        Resolution::LowConfidence {
            register_number,
            subject_code,
        } => (
            register_number.clone(),
            subject_code.clone(),
            raw_filename.clone(),
            false,
            json!(null),
        ),
        Resolution::None => (None, None, raw_filename.clone(), false, json!(null)),
    };

    let outcome = store_and_record(
        &state,
        &staff,
        file.content,
        raw_filename.clone(),
        canonical.clone(),
        reg_no.clone(),
        subject.clone(),
        exam_type,
        mime,
        extension,
        auto_processed,
    )
    .await;

    let _ = state
        .audit
        .log(
            NewAuditEntry::new("scan_upload", "staff")
                .actor(staff.id, staff.username.clone())
                .payload(json!({
                    "original_filename": raw_filename,
                    "renamed_filename": canonical,
                    "auto_processed": auto_processed,
                    "confidences": confidences,
                }))
                .result(if outcome.is_ok() { "ok" } else { "error" }),
        )
        .await;

    let (artifact, created) = outcome?;
    Ok(Json(json!({
        "success": true,
        "original_filename": artifact.raw_filename,
        "renamed_filename": artifact.canonical_filename,
        "register_number": artifact.parsed_reg_no,
        "subject_code": artifact.parsed_subject_code,
        "exam_type": artifact.exam_type,
        "attempt_number": artifact.attempt_number,
        "status": artifact.workflow_status,
        "auto_processed": artifact.auto_processed,
        "artifact_id": artifact.id,
        "duplicate": !created,
    })))
}
