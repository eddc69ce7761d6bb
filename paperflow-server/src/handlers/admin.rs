use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use paperflow_core::database::repositories::ListFilter;
use paperflow_core::identity;
use paperflow_core::model::{ExamType, NewAuditEntry, StaffUser};
use paperflow_core::submission::worker;

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};

// ---------------------------------------------------------------------
// Subject mappings
// ---------------------------------------------------------------------

pub async fn list_subject_mappings(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
) -> AppResult<Json<serde_json::Value>> {
    let mappings = state
        .mappings
        .list_subject_mappings()
        .await
        .map_err(AppError::from)?;
    Ok(Json(json!({"mappings": mappings})))
}

#[derive(Debug, Deserialize)]
pub struct CreateSubjectMapping {
    pub subject_code: String,
    #[serde(default)]
    pub exam_type: Option<String>,
    pub moodle_course_id: i64,
    pub moodle_assignment_id: i64,
}

pub async fn create_subject_mapping(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Json(request): Json<CreateSubjectMapping>,
) -> AppResult<Json<serde_json::Value>> {
    let subject = identity::normalize_subject_code(&request.subject_code).map_err(AppError::from)?;
    let exam_type = parse_exam_type(request.exam_type.as_deref())?;

    let mapping = state
        .mappings
        .create_subject_mapping(
            &subject,
            exam_type,
            request.moodle_course_id,
            request.moodle_assignment_id,
        )
        .await
        .map_err(AppError::from)?;

    audit(&state, &staff, "admin_create_mapping", mapping.id).await;
    Ok(Json(json!({"mapping": mapping})))
}

pub async fn delete_subject_mapping(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = state
        .mappings
        .delete_subject_mapping(id)
        .await
        .map_err(AppError::from)?;
    if !deleted {
        return Err(AppError::not_found(format!("mapping {id}")));
    }
    audit(&state, &staff, "admin_delete_mapping", id).await;
    Ok(Json(json!({"deleted": true})))
}

// ---------------------------------------------------------------------
// Username/register mappings
// ---------------------------------------------------------------------

pub async fn list_username_mappings(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
) -> AppResult<Json<serde_json::Value>> {
    let mappings = state
        .mappings
        .list_username_mappings()
        .await
        .map_err(AppError::from)?;
    Ok(Json(json!({"mappings": mappings})))
}

#[derive(Debug, Deserialize)]
pub struct CreateUsernameMapping {
    pub moodle_username: String,
    pub register_number: String,
}

pub async fn create_username_mapping(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Json(request): Json<CreateUsernameMapping>,
) -> AppResult<Json<serde_json::Value>> {
    identity::validate_register_number(request.register_number.trim()).map_err(AppError::from)?;
    let username = request.moodle_username.trim();
    if username.is_empty() {
        return Err(AppError::validation("moodle_username is required"));
    }

    let mapping = state
        .mappings
        .create_username_mapping(username, request.register_number.trim())
        .await
        .map_err(AppError::from)?;

    audit(&state, &staff, "admin_create_username_mapping", mapping.id).await;
    Ok(Json(json!({"mapping": mapping})))
}

pub async fn delete_username_mapping(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let deleted = state
        .mappings
        .delete_username_mapping(id)
        .await
        .map_err(AppError::from)?;
    if !deleted {
        return Err(AppError::not_found(format!("mapping {id}")));
    }
    audit(&state, &staff, "admin_delete_username_mapping", id).await;
    Ok(Json(json!({"deleted": true})))
}

// ---------------------------------------------------------------------
// Audit log
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub action: Option<String>,
    pub actor_type: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    100
}

pub async fn audit_logs(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Query(query): Query<AuditQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let entries = state
        .audit
        .list(
            query.action.as_deref(),
            query.actor_type.as_deref(),
            query.limit.clamp(1, 500),
            query.offset.max(0),
        )
        .await
        .map_err(AppError::from)?;
    Ok(Json(json!({"entries": entries})))
}

// ---------------------------------------------------------------------
// Retry queue
// ---------------------------------------------------------------------

pub async fn queue_status(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
) -> AppResult<Json<serde_json::Value>> {
    let counts = state.queue.counts_by_status().await.map_err(AppError::from)?;
    let recent = state.queue.list_recent(50).await.map_err(AppError::from)?;
    let by_status: serde_json::Map<String, serde_json::Value> = counts
        .into_iter()
        .map(|(status, n)| (status, json!(n)))
        .collect();
    Ok(Json(json!({"counts": by_status, "recent": recent})))
}

/// POST /admin/queue/retry: pull every queued entry forward and run one
/// scan pass immediately.
pub async fn queue_retry(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
) -> AppResult<Json<serde_json::Value>> {
    let promoted = state.queue.make_due_now().await.map_err(AppError::from)?;
    let processed = worker::run_once(&state.orchestrator)
        .await
        .map_err(AppError::from)?;

    audit(&state, &staff, "admin_retry_queue", staff.id).await;
    Ok(Json(json!({"promoted": promoted, "processed": processed})))
}

// ---------------------------------------------------------------------
// Artifact administration
// ---------------------------------------------------------------------

pub async fn artifact_detail(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let artifact = state
        .artifacts
        .get_by_id(id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found(format!("artifact {id}")))?;

    let audit_trail = state
        .audit
        .for_target(&id.to_string())
        .await
        .map_err(AppError::from)?;

    Ok(Json(json!({"artifact": artifact, "audit": audit_trail})))
}

#[derive(Debug, Deserialize)]
pub struct EditArtifact {
    pub register_number: String,
    pub subject_code: String,
    #[serde(default)]
    pub exam_type: Option<String>,
}

/// POST /admin/artifacts/{id}/edit: correct a mis-parsed identity.
pub async fn edit_artifact(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Path(id): Path<Uuid>,
    Json(request): Json<EditArtifact>,
) -> AppResult<Json<serde_json::Value>> {
    identity::validate_register_number(request.register_number.trim()).map_err(AppError::from)?;
    let subject = identity::normalize_subject_code(&request.subject_code).map_err(AppError::from)?;
    let exam_type = parse_exam_type(request.exam_type.as_deref())?;

    let current = state
        .artifacts
        .get_by_id(id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found(format!("artifact {id}")))?;
    let extension = identity::extension_for_mime(&current.mime_type);

    let canonical = identity::canonical_filename(
        request.register_number.trim(),
        &subject,
        exam_type,
        extension,
    );

    let updated = state
        .artifacts
        .update_identity(
            id,
            request.register_number.trim(),
            &subject,
            exam_type,
            &canonical,
        )
        .await
        .map_err(AppError::from)?;

    audit(&state, &staff, "admin_edit_artifact", id).await;
    Ok(Json(json!({"artifact": updated})))
}

pub async fn reset_artifact(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    state.artifacts.reset_status(id).await.map_err(AppError::from)?;
    audit(&state, &staff, "admin_reset_artifact", id).await;
    Ok(Json(json!({"reset": true})))
}

pub async fn delete_artifact(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<serde_json::Value>> {
    let artifact = state
        .artifacts
        .get_by_id(id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found(format!("artifact {id}")))?;

    state.artifacts.soft_delete(id).await.map_err(AppError::from)?;
    state.store.delete(&artifact).await.map_err(AppError::from)?;

    audit(&state, &staff, "admin_delete_artifact", id).await;
    Ok(Json(json!({"deleted": true})))
}

#[derive(Debug, Deserialize)]
pub struct PurgeRequest {
    #[serde(default)]
    pub confirm: bool,
}

/// POST /admin/artifacts/purge-all: hard delete, guarded and audited.
pub async fn purge_all(
    State(state): State<AppState>,
    Extension(staff): Extension<StaffUser>,
    Json(request): Json<PurgeRequest>,
) -> AppResult<Json<serde_json::Value>> {
    let purged = state
        .artifacts
        .purge_all(request.confirm)
        .await
        .map_err(AppError::from)?;

    audit(&state, &staff, "admin_purge_all", staff.id).await;
    Ok(Json(json!({"purged": purged})))
}

/// GET /admin/artifacts/unassigned: uploads whose register number has no
/// username mapping; they appear on no student dashboard.
pub async fn unassigned(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
) -> AppResult<Json<serde_json::Value>> {
    let filter = ListFilter {
        unassigned_only: true,
        ..Default::default()
    };
    let listing = state
        .artifacts
        .list(&filter, 500, 0)
        .await
        .map_err(AppError::from)?;
    Ok(Json(json!({
        "total": listing.total,
        "artifacts": listing.artifacts,
    })))
}

// ---------------------------------------------------------------------
// System stats and LMS user lookup
// ---------------------------------------------------------------------

pub async fn system_stats(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
) -> AppResult<Json<serde_json::Value>> {
    let artifact_stats = state.artifacts.stats().await.map_err(AppError::from)?;
    let queue_counts = state.queue.counts_by_status().await.map_err(AppError::from)?;

    let artifacts: serde_json::Map<String, serde_json::Value> = artifact_stats
        .into_iter()
        .map(|(status, n)| (status, json!(n)))
        .collect();
    let queue: serde_json::Map<String, serde_json::Value> = queue_counts
        .into_iter()
        .map(|(status, n)| (status, json!(n)))
        .collect();

    Ok(Json(json!({"artifacts": artifacts, "queue": queue})))
}

#[derive(Debug, Deserialize)]
pub struct UserLookupQuery {
    #[serde(default = "default_field")]
    pub field: String,
    pub value: String,
}

fn default_field() -> String {
    "username".to_string()
}

/// GET /admin/users/lookup: resolve a Moodle user with the admin token;
/// only available when one is configured.
pub async fn user_lookup(
    State(state): State<AppState>,
    Extension(_staff): Extension<StaffUser>,
    Query(query): Query<UserLookupQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let Some(token) = &state.config.moodle_admin_token else {
        return Err(AppError::not_found(
            "admin token not configured; user lookup disabled",
        ));
    };

    let user = state
        .lms
        .user_by_field(token, &query.field, &query.value)
        .await
        .map_err(|e| AppError::from(paperflow_core::CoreError::from(e)))?;

    match user {
        Some(user) => Ok(Json(json!({
            "id": user.id,
            "username": user.username,
            "email": user.email,
            "fullname": user.fullname,
        }))),
        None => Err(AppError::not_found("no matching Moodle user")),
    }
}

async fn audit(state: &AppState, staff: &StaffUser, action: &str, target: impl ToString) {
    let _ = state
        .audit
        .log(
            NewAuditEntry::new(action, "staff")
                .actor(staff.id, staff.username.clone())
                .target(target),
        )
        .await;
}

fn parse_exam_type(raw: Option<&str>) -> Result<ExamType, AppError> {
    match raw {
        Some(value) if !value.trim().is_empty() => {
            ExamType::parse(value).map_err(AppError::from)
        }
        _ => Ok(ExamType::default()),
    }
}
