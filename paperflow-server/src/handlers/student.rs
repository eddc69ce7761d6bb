use axum::{
    extract::{Path, State},
    http::header,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use uuid::Uuid;

use paperflow_core::model::{Artifact, NewAuditEntry, StudentSession};

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};

/// GET /student/dashboard: every attempt uploaded for the register
/// number mapped to this account.
pub async fn dashboard(
    State(state): State<AppState>,
    Extension(session): Extension<StudentSession>,
) -> AppResult<Json<serde_json::Value>> {
    let Some(register) = state
        .mappings
        .register_for_username(&session.moodle_username)
        .await
        .map_err(AppError::from)?
    else {
        return Ok(Json(json!({
            "register_mapped": false,
            "artifacts": [],
        })));
    };

    let artifacts = state
        .artifacts
        .list_for_register(&register)
        .await
        .map_err(AppError::from)?;

    let rows: Vec<serde_json::Value> = artifacts
        .iter()
        .map(|a| {
            json!({
                "artifact_id": a.id,
                "filename": a.canonical_filename,
                "subject_code": a.parsed_subject_code,
                "exam_type": a.exam_type,
                "attempt_number": a.attempt_number,
                "status": a.workflow_status,
                "uploaded_at": a.uploaded_at,
                "submitted_at": a.completed_at,
                "error": a.error_message,
            })
        })
        .collect();

    Ok(Json(json!({
        "register_mapped": true,
        "register_number": register,
        "artifacts": rows,
    })))
}

/// GET /student/paper/{id}/view: the artifact bytes, disk or blob.
pub async fn view_paper(
    State(state): State<AppState>,
    Extension(session): Extension<StudentSession>,
    Path(artifact_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let artifact = load_owned_artifact(&state, &session, artifact_id).await?;
    let content = state.store.get(&artifact).await.map_err(AppError::from)?;

    Ok((
        [
            (header::CONTENT_TYPE, artifact.mime_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"{}\"", artifact.canonical_filename),
            ),
        ],
        content,
    ))
}

/// POST /student/submit/{id}: hand the artifact to the orchestrator.
pub async fn submit(
    State(state): State<AppState>,
    Extension(session): Extension<StudentSession>,
    Path(artifact_id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let outcome = state.orchestrator.submit(artifact_id, &session).await;

    let _ = state
        .audit
        .log(
            NewAuditEntry::new("student_submit", "student")
                .actor(session.moodle_user_id, session.moodle_username.clone())
                .target(artifact_id)
                .result(match &outcome {
                    Ok(_) => "ok".to_string(),
                    Err(err) => err.kind().to_string(),
                }),
        )
        .await;

    let outcome = outcome.map_err(AppError::from)?;
    Ok(Json(json!({
        "submission_id": outcome.submission_id,
        "artifact_id": outcome.artifact_id,
    })))
}

/// Load an artifact and prove it belongs to the session's register.
async fn load_owned_artifact(
    state: &AppState,
    session: &StudentSession,
    artifact_id: Uuid,
) -> Result<Artifact, AppError> {
    let artifact = state
        .artifacts
        .get_by_id(artifact_id)
        .await
        .map_err(AppError::from)?
        .filter(|a| !a.tombstoned)
        .ok_or_else(|| AppError::not_found(format!("artifact {artifact_id}")))?;

    let register = state
        .mappings
        .register_for_username(&session.moodle_username)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::forbidden("no register number mapped to this account"))?;

    if artifact.parsed_reg_no.as_deref() != Some(register.as_str()) {
        return Err(AppError::forbidden("artifact does not belong to this student"));
    }
    Ok(artifact)
}
