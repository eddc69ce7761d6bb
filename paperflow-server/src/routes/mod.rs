use axum::{
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::app_state::AppState;
use crate::auth;
use crate::handlers::{admin, extract, health, student, upload};

/// Assemble the full API router.
pub fn create_router(state: AppState) -> Router {
    let public = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/auth/staff/login", post(auth::handlers::staff_login))
        .route("/auth/student/login", post(auth::handlers::student_login))
        .route("/extract/status", get(extract::status));

    let staff = Router::new()
        .route("/upload/single", post(upload::upload_single))
        .route("/upload/bulk", post(upload::upload_bulk))
        .route("/upload/check-duplicates", post(upload::check_duplicates))
        .route("/upload/validate-mappings", post(upload::validate_mappings))
        .route("/upload/all", get(upload::list_all))
        .route("/upload/pending", get(upload::list_pending))
        .route("/upload/auto-processed", get(upload::list_auto_processed))
        .route("/upload/stats", get(upload::stats))
        .route("/extract/scan-upload", post(extract::scan_upload))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::staff_auth,
        ));

    let student = Router::new()
        .route("/student/dashboard", get(student::dashboard))
        .route("/student/paper/{id}/view", get(student::view_paper))
        .route("/student/submit/{id}", post(student::submit))
        .route("/auth/student/logout", post(auth::handlers::student_logout))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::student_auth,
        ));

    // admin_only must run after staff_auth, so it is added first.
    let admin = Router::new()
        .route(
            "/admin/mappings",
            get(admin::list_subject_mappings).post(admin::create_subject_mapping),
        )
        .route("/admin/mappings/{id}", delete(admin::delete_subject_mapping))
        .route(
            "/admin/username-mappings",
            get(admin::list_username_mappings).post(admin::create_username_mapping),
        )
        .route(
            "/admin/username-mappings/{id}",
            delete(admin::delete_username_mapping),
        )
        .route("/admin/audit-logs", get(admin::audit_logs))
        .route("/admin/queue/status", get(admin::queue_status))
        .route("/admin/queue/retry", post(admin::queue_retry))
        .route("/admin/stats", get(admin::system_stats))
        .route("/admin/users/lookup", get(admin::user_lookup))
        .route("/admin/artifacts/unassigned", get(admin::unassigned))
        .route("/admin/artifacts/purge-all", post(admin::purge_all))
        .route(
            "/admin/artifacts/{id}",
            get(admin::artifact_detail).delete(admin::delete_artifact),
        )
        .route("/admin/artifacts/{id}/edit", post(admin::edit_artifact))
        .route("/admin/artifacts/{id}/reset", post(admin::reset_artifact))
        .layer(middleware::from_fn(auth::admin_only))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::staff_auth,
        ));

    // Multipart bodies must fit the configured upload ceiling, with some
    // slack for the form framing.
    let body_limit = state.config.max_file_size_bytes() + 1024 * 1024;

    Router::new()
        .merge(public)
        .merge(staff)
        .merge(student)
        .merge(admin)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins = &state.config.cors_allowed_origins;
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin, "ignoring unparsable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods(Any)
        .allow_headers(Any)
}
