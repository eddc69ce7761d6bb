use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use paperflow_core::model::{StaffRole, StaffUser, StudentSession};

use super::{SESSION_COOKIE, SESSION_HEADER};
use crate::app_state::AppState;
use crate::errors::AppError;

/// Resolve the staff principal from a `Bearer` token and stash it in the
/// request extensions.
pub async fn staff_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = extract_bearer_token(&request)?;
    let claims = state
        .token_keys
        .verify(&token)
        .map_err(|e| AppError::auth_invalid(e.to_string()))?;

    let staff = state
        .staff
        .get_by_id(claims.sub)
        .await
        .map_err(AppError::from)?
        .filter(|s| s.is_active)
        .ok_or_else(|| AppError::auth_invalid("unknown or deactivated staff account"))?;

    request.extensions_mut().insert(staff);
    Ok(next.run(request).await)
}

/// Role gate layered after `staff_auth`.
pub async fn admin_only(request: Request, next: Next) -> Result<Response, AppError> {
    let staff = request
        .extensions()
        .get::<StaffUser>()
        .ok_or_else(AppError::auth_required)?;

    if staff.role < StaffRole::Admin {
        return Err(AppError::forbidden("admin role required"));
    }
    Ok(next.run(request).await)
}

/// Resolve the student principal from the session header or cookie.
/// Expired sessions read as absent, so a stale id yields `AUTH_INVALID`.
pub async fn student_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session_id = extract_session_id(&request).ok_or_else(AppError::auth_required)?;

    let session = state
        .sessions
        .get_active(&session_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::auth_invalid("session expired or unknown"))?;

    request.extensions_mut().insert::<StudentSession>(session);
    Ok(next.run(request).await)
}

fn extract_bearer_token(request: &Request) -> Result<String, AppError> {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(AppError::auth_required)?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::to_string)
        .ok_or_else(AppError::auth_required)
}

fn extract_session_id(request: &Request) -> Option<String> {
    if let Some(id) = request
        .headers()
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        if !id.is_empty() {
            return Some(id.to_string());
        }
    }

    let cookies = request.headers().get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}
