use axum::{extract::State, Extension, Json};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use paperflow_core::auth::generate_session_id;
use paperflow_core::model::{NewAuditEntry, StudentSession};

use crate::app_state::AppState;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct StaffLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct StaffLoginResponse {
    pub token: String,
    pub expires_at: i64,
}

pub async fn staff_login(
    State(state): State<AppState>,
    Json(request): Json<StaffLoginRequest>,
) -> AppResult<Json<StaffLoginResponse>> {
    let staff = state
        .staff
        .get_by_username(&request.username)
        .await
        .map_err(AppError::from)?
        .filter(|s| s.is_active)
        .ok_or_else(|| AppError::auth_invalid("invalid credentials"))?;

    if !state
        .crypto
        .verify_password(&request.password, &staff.password_hash)
    {
        warn!(username = %request.username, "staff login rejected");
        return Err(AppError::auth_invalid("invalid credentials"));
    }

    let lifetime = Duration::minutes(state.config.access_token_expire_minutes);
    let (token, expires_at) = state
        .token_keys
        .issue(&staff, lifetime)
        .map_err(AppError::from)?;

    state.staff.touch_login(staff.id).await.map_err(AppError::from)?;
    let _ = state
        .audit
        .log(
            NewAuditEntry::new("staff_login", "staff")
                .actor(staff.id, staff.username.clone()),
        )
        .await;

    info!(username = %staff.username, "staff logged in");
    Ok(Json(StaffLoginResponse { token, expires_at }))
}

#[derive(Debug, Deserialize)]
pub struct StudentLoginRequest {
    pub moodle_username: String,
    pub moodle_password: String,
}

#[derive(Debug, Serialize)]
pub struct StudentLoginResponse {
    pub session_id: String,
    pub expires_at: i64,
}

/// Exchange LMS credentials for a local session. The LMS token is
/// encrypted immediately; only ciphertext touches the database.
pub async fn student_login(
    State(state): State<AppState>,
    Json(request): Json<StudentLoginRequest>,
) -> AppResult<Json<StudentLoginResponse>> {
    let lms_token = state
        .lms
        .exchange_token(&request.moodle_username, &request.moodle_password)
        .await
        .map_err(|e| AppError::auth_invalid(e.to_string()))?;

    let site_info = state
        .lms
        .site_info(&lms_token)
        .await
        .map_err(|e| AppError::from(paperflow_core::CoreError::from(e)))?;

    let encrypted = state.vault.encrypt(&lms_token).map_err(AppError::from)?;
    let session_id = generate_session_id();
    let expires_at = Utc::now() + Duration::hours(state.config.session_expire_hours);

    let session = state
        .sessions
        .create(
            &session_id,
            &site_info.username,
            site_info.user_id,
            &encrypted,
            expires_at,
        )
        .await
        .map_err(AppError::from)?;

    let _ = state
        .audit
        .log(
            NewAuditEntry::new("student_login", "student")
                .actor(site_info.user_id, site_info.username.clone()),
        )
        .await;

    info!(username = %site_info.username, "student logged in");
    Ok(Json(StudentLoginResponse {
        session_id: session.id,
        expires_at: session.expires_at.timestamp(),
    }))
}

pub async fn student_logout(
    State(state): State<AppState>,
    Extension(session): Extension<StudentSession>,
) -> AppResult<Json<serde_json::Value>> {
    state
        .sessions
        .delete(&session.id)
        .await
        .map_err(AppError::from)?;

    let _ = state
        .audit
        .log(
            NewAuditEntry::new("student_logout", "student")
                .actor(session.moodle_user_id, session.moodle_username.clone()),
        )
        .await;

    Ok(Json(json!({"logged_out": true})))
}
