//! MoodleClient against a local stand-in server. All wire interactions
//! are exercised for real; no actual Moodle needed.

mod common;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Form, Multipart, Query, State};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use paperflow_core::lms::{LmsErrorKind, MoodleClient};

#[derive(Clone, Default)]
struct MoodleStub {
    calls: Arc<Mutex<Vec<String>>>,
    fail_save_with: Arc<Mutex<Option<&'static str>>>,
}

impl MoodleStub {
    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn moodle_router(stub: MoodleStub) -> Router {
    Router::new()
        .route("/login/token.php", post(token_endpoint))
        .route("/webservice/rest/server.php", post(rest_endpoint))
        .route("/webservice/upload.php", post(upload_endpoint))
        .with_state(stub)
}

async fn token_endpoint(
    State(stub): State<MoodleStub>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    stub.record("token");
    if form.get("password").map(String::as_str) == Some("correct-password")
        && form.get("service").map(String::as_str) == Some("moodle_mobile_app")
    {
        Json(json!({"token": "c53569d516cd601cb78849cd64f59eaa"}))
    } else {
        Json(json!({"error": "Invalid login", "errorcode": "invalidlogin"}))
    }
}

async fn rest_endpoint(
    State(stub): State<MoodleStub>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    let function = form.get("wsfunction").cloned().unwrap_or_default();
    stub.record(function.clone());

    if form.get("wstoken").map(String::as_str) != Some("c53569d516cd601cb78849cd64f59eaa") {
        return Json(json!({
            "exception": "moodle_exception",
            "errorcode": "invalidtoken",
            "message": "Invalid token",
        }));
    }

    match function.as_str() {
        "core_webservice_get_site_info" => Json(json!({
            "userid": 42,
            "username": "22007928",
            "fullname": "Santhan Kumar",
        })),
        "core_user_get_users_by_field" => {
            if form.get("values[0]").map(String::as_str) == Some("22007928") {
                Json(json!([
                    {"id": 42, "username": "22007928", "email": "santhan@university.edu"}
                ]))
            } else {
                Json(json!([]))
            }
        }
        "mod_assign_save_submission" => {
            if let Some(code) = *stub.fail_save_with.lock().unwrap() {
                return Json(json!([
                    {"warningcode": code, "message": "rejected"}
                ]));
            }
            assert!(form.contains_key("plugindata[files_filemanager]"));
            Json(json!([]))
        }
        "mod_assign_submit_for_grading" => Json(json!({"submissionid": 777})),
        other => Json(json!({
            "exception": "moodle_exception",
            "errorcode": "invalidfunction",
            "message": format!("unknown function {other}"),
        })),
    }
}

async fn upload_endpoint(
    State(stub): State<MoodleStub>,
    Query(query): Query<HashMap<String, String>>,
    mut multipart: Multipart,
) -> Json<Value> {
    stub.record("upload");
    if query.get("token").map(String::as_str) != Some("c53569d516cd601cb78849cd64f59eaa") {
        return Json(json!({"errorcode": "invalidtoken", "error": "Invalid token"}));
    }

    let mut size = 0;
    while let Ok(Some(field)) = multipart.next_field().await {
        size += field.bytes().await.map(|b| b.len()).unwrap_or(0);
    }
    assert!(size > 0, "upload carried no bytes");
    Json(json!([{"itemid": 123456, "filename": "paper.pdf"}]))
}

#[tokio::test]
async fn exchanges_credentials_for_token() {
    let stub = MoodleStub::default();
    let base = common::spawn_server(moodle_router(stub)).await;
    let client = MoodleClient::new(&base);

    let token = client
        .exchange_token("22007928", "correct-password")
        .await
        .unwrap();
    assert_eq!(token, "c53569d516cd601cb78849cd64f59eaa");

    let err = client
        .exchange_token("22007928", "wrong-password")
        .await
        .unwrap_err();
    assert_eq!(err.kind, LmsErrorKind::AuthInvalid);
}

#[tokio::test]
async fn resolves_site_info_and_users() {
    let stub = MoodleStub::default();
    let base = common::spawn_server(moodle_router(stub)).await;
    let client = MoodleClient::new(&base);
    let token = "c53569d516cd601cb78849cd64f59eaa";

    let info = client.site_info(token).await.unwrap();
    assert_eq!(info.user_id, 42);
    assert_eq!(info.username, "22007928");

    let user = client
        .user_by_field(token, "username", "22007928")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.email.as_deref(), Some("santhan@university.edu"));

    let missing = client
        .user_by_field(token, "username", "nonexistent")
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn invalid_token_classifies_as_auth_invalid() {
    let stub = MoodleStub::default();
    let base = common::spawn_server(moodle_router(stub)).await;
    let client = MoodleClient::new(&base);

    let err = client.site_info("stale-token").await.unwrap_err();
    assert_eq!(err.kind, LmsErrorKind::AuthInvalid);
    assert_eq!(err.errorcode.as_deref(), Some("invalidtoken"));
}

#[tokio::test]
async fn runs_the_full_submission_conversation_in_order() {
    let stub = MoodleStub::default();
    let base = common::spawn_server(moodle_router(stub.clone())).await;
    let client = MoodleClient::new(&base);
    let token = "c53569d516cd601cb78849cd64f59eaa";

    let item_id = client
        .upload_file(token, b"%PDF-1.4 paper".to_vec(), "212222240047_19AI405_CIA1.pdf")
        .await
        .unwrap();
    assert_eq!(item_id, 123456);

    client.save_submission(token, 9, item_id).await.unwrap();
    let submission_id = client.submit_for_grading(token, 9).await.unwrap();
    assert_eq!(submission_id, Some(777));

    assert_eq!(
        stub.calls(),
        vec![
            "upload".to_string(),
            "mod_assign_save_submission".to_string(),
            "mod_assign_submit_for_grading".to_string(),
        ]
    );
}

#[tokio::test]
async fn payload_rejection_is_terminal_kind() {
    let stub = MoodleStub::default();
    *stub.fail_save_with.lock().unwrap() = Some("maxbytes");
    let base = common::spawn_server(moodle_router(stub)).await;
    let client = MoodleClient::new(&base);
    let token = "c53569d516cd601cb78849cd64f59eaa";

    let err = client.save_submission(token, 9, 123456).await.unwrap_err();
    assert_eq!(err.kind, LmsErrorKind::PayloadReject);
}

#[tokio::test]
async fn unreachable_server_classifies_as_transient() {
    // Nothing listens on this port.
    let client = MoodleClient::new("http://127.0.0.1:1");
    let err = client.site_info("any").await.unwrap_err();
    assert_eq!(err.kind, LmsErrorKind::Transient);
}
