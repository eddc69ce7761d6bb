//! Moodle web-service client.
//!
//! Form-encoded POSTs against the REST endpoint plus a multipart upload
//! endpoint. Moodle signals failure inside an HTTP 200 body, so every
//! response is inspected for `exception`/`errorcode` keys before use.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::CoreError;

const CALL_TIMEOUT: Duration = Duration::from_secs(60);
const TOKEN_ENDPOINT: &str = "/login/token.php";
const REST_ENDPOINT: &str = "/webservice/rest/server.php";
const UPLOAD_ENDPOINT: &str = "/webservice/upload.php";
const SERVICE: &str = "moodle_mobile_app";

/// Failure classes driving the orchestrator's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LmsErrorKind {
    /// Network, timeout, or 5xx: worth retrying.
    Transient,
    /// The student's token is dead; the session must go.
    AuthInvalid,
    /// Token works but lacks permission on the assignment.
    Authz,
    /// Moodle rejected the file itself; retrying the same bytes is futile.
    PayloadReject,
    Unknown,
}

#[derive(Debug, Clone, Error)]
#[error("LMS error ({kind:?}): {message}")]
pub struct LmsError {
    pub kind: LmsErrorKind,
    pub errorcode: Option<String>,
    pub message: String,
}

impl LmsError {
    fn transport(message: impl Into<String>) -> Self {
        Self {
            kind: LmsErrorKind::Transient,
            errorcode: None,
            message: message.into(),
        }
    }

    fn unknown(message: impl Into<String>) -> Self {
        Self {
            kind: LmsErrorKind::Unknown,
            errorcode: None,
            message: message.into(),
        }
    }
}

impl From<LmsError> for CoreError {
    fn from(err: LmsError) -> Self {
        match err.kind {
            LmsErrorKind::Transient | LmsErrorKind::Unknown => {
                CoreError::UpstreamTransient(err.to_string())
            }
            LmsErrorKind::AuthInvalid => CoreError::AuthInvalid(err.to_string()),
            LmsErrorKind::Authz => CoreError::Authz(err.to_string()),
            LmsErrorKind::PayloadReject => CoreError::UpstreamReject(err.to_string()),
        }
    }
}

/// Classify a Moodle `errorcode`.
pub fn classify_errorcode(errorcode: &str) -> LmsErrorKind {
    match errorcode {
        "invalidtoken" | "tokennotfound" | "invalidlogin" => LmsErrorKind::AuthInvalid,
        "nopermissions" | "nopermission" | "accessexception" => LmsErrorKind::Authz,
        "maxbytes" | "fileoversized" | "filetoolarge" | "invalidfiletype" | "upload_error" => {
            LmsErrorKind::PayloadReject
        }
        _ => LmsErrorKind::Unknown,
    }
}

/// Reject bodies carrying `exception`/`errorcode`; HTTP 200 alone does
/// not indicate success.
pub fn check_body(value: Value) -> Result<Value, LmsError> {
    if let Some(object) = value.as_object() {
        if object.contains_key("exception") || object.contains_key("errorcode") {
            let errorcode = object
                .get("errorcode")
                .or_else(|| object.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string);
            let message = object
                .get("message")
                .or_else(|| object.get("error"))
                .and_then(Value::as_str)
                .unwrap_or("unspecified LMS error")
                .to_string();
            let kind = errorcode
                .as_deref()
                .map(classify_errorcode)
                .unwrap_or(LmsErrorKind::Unknown);
            return Err(LmsError {
                kind,
                errorcode,
                message,
            });
        }
    }
    Ok(value)
}

#[derive(Debug, Clone)]
pub struct SiteInfo {
    pub user_id: i64,
    pub username: String,
    pub fullname: Option<String>,
}

pub fn parse_site_info(value: &Value) -> Result<SiteInfo, LmsError> {
    let user_id = value
        .get("userid")
        .and_then(Value::as_i64)
        .ok_or_else(|| LmsError::unknown("site info response missing userid"))?;
    let username = value
        .get("username")
        .and_then(Value::as_str)
        .ok_or_else(|| LmsError::unknown("site info response missing username"))?
        .to_string();
    Ok(SiteInfo {
        user_id,
        username,
        fullname: value
            .get("fullname")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

#[derive(Debug, Clone)]
pub struct MoodleUser {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub fullname: Option<String>,
}

pub fn parse_user_list(value: &Value) -> Result<Option<MoodleUser>, LmsError> {
    let list = value
        .as_array()
        .ok_or_else(|| LmsError::unknown("user lookup response is not a list"))?;
    let Some(first) = list.first() else {
        return Ok(None);
    };
    let id = first
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| LmsError::unknown("user record missing id"))?;
    let username = first
        .get("username")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Ok(Some(MoodleUser {
        id,
        username,
        email: first
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string),
        fullname: first
            .get("fullname")
            .and_then(Value::as_str)
            .map(str::to_string),
    }))
}

/// The upload endpoint answers with a list of stored draft files.
pub fn parse_upload_response(value: &Value) -> Result<i64, LmsError> {
    value
        .as_array()
        .and_then(|list| list.first())
        .and_then(|first| first.get("itemid"))
        .and_then(Value::as_i64)
        .ok_or_else(|| LmsError::unknown("upload response carried no itemid"))
}

/// `mod_assign_submit_for_grading` answers `null`/`[]` on stock Moodle;
/// some deployments include a submission id. Absent ids are fine.
pub fn parse_submission_id(value: &Value) -> Option<i64> {
    value
        .get("submissionid")
        .or_else(|| value.get("id"))
        .and_then(Value::as_i64)
}

/// Save/submit calls answer `null` or a list of warnings.
pub fn check_warnings(value: &Value) -> Result<(), LmsError> {
    if let Some(list) = value.as_array() {
        if let Some(first) = list.iter().find(|w| w.is_object()) {
            let code = first
                .get("warningcode")
                .and_then(Value::as_str)
                .unwrap_or("warning");
            let message = first
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("LMS returned a warning");
            return Err(LmsError {
                kind: classify_errorcode(code),
                errorcode: Some(code.to_string()),
                message: message.to_string(),
            });
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct MoodleClient {
    base_url: String,
    http: reqwest::Client,
}

impl MoodleClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::builder()
                .timeout(CALL_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail"),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Exchange student credentials for a web-service token.
    pub async fn exchange_token(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, LmsError> {
        let body = self
            .post_form(
                TOKEN_ENDPOINT,
                &[
                    ("username", username),
                    ("password", password),
                    ("service", SERVICE),
                ],
            )
            .await?;

        if let Some(token) = body.get("token").and_then(Value::as_str) {
            return Ok(token.to_string());
        }

        // token.php reports failure as {error, errorcode}
        let errorcode = body
            .get("errorcode")
            .and_then(Value::as_str)
            .unwrap_or("invalidlogin");
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("credential exchange failed");
        Err(LmsError {
            kind: LmsErrorKind::AuthInvalid,
            errorcode: Some(errorcode.to_string()),
            message: message.to_string(),
        })
    }

    /// Resolve `(user_id, username)` from a token.
    pub async fn site_info(&self, token: &str) -> Result<SiteInfo, LmsError> {
        let body = self
            .rest(token, "core_webservice_get_site_info", &[])
            .await?;
        parse_site_info(&body)
    }

    /// Admin-flow user lookup, e.g. by `username` or `email`.
    pub async fn user_by_field(
        &self,
        token: &str,
        field: &str,
        value: &str,
    ) -> Result<Option<MoodleUser>, LmsError> {
        let body = self
            .rest(
                token,
                "core_user_get_users_by_field",
                &[("field", field), ("values[0]", value)],
            )
            .await?;
        parse_user_list(&body)
    }

    /// Upload bytes into the user's draft file area; returns the draft
    /// item id used to attach the file to an assignment.
    pub async fn upload_file(
        &self,
        token: &str,
        content: Vec<u8>,
        filename: &str,
    ) -> Result<i64, LmsError> {
        let part = Part::bytes(content).file_name(filename.to_string());
        let form = Form::new().part("file_1", part);

        let response = self
            .http
            .post(format!("{}{UPLOAD_ENDPOINT}", self.base_url))
            .query(&[("token", token), ("itemid", "0")])
            .multipart(form)
            .send()
            .await
            .map_err(map_transport)?;

        let body: Value = response
            .json()
            .await
            .map_err(|e| LmsError::unknown(format!("upload response is not JSON: {e}")))?;
        let body = check_body(body)?;
        parse_upload_response(&body)
    }

    /// Attach a draft item to the assignment's file submission plugin.
    pub async fn save_submission(
        &self,
        token: &str,
        assignment_id: i64,
        item_id: i64,
    ) -> Result<(), LmsError> {
        let assignment = assignment_id.to_string();
        let item = item_id.to_string();
        let body = self
            .rest(
                token,
                "mod_assign_save_submission",
                &[
                    ("assignmentid", assignment.as_str()),
                    ("plugindata[files_filemanager]", item.as_str()),
                ],
            )
            .await?;
        check_warnings(&body)
    }

    /// Finalise the submission for grading.
    pub async fn submit_for_grading(
        &self,
        token: &str,
        assignment_id: i64,
    ) -> Result<Option<i64>, LmsError> {
        let assignment = assignment_id.to_string();
        let body = self
            .rest(
                token,
                "mod_assign_submit_for_grading",
                &[
                    ("assignmentid", assignment.as_str()),
                    ("acceptsubmissionstatement", "1"),
                ],
            )
            .await?;
        check_warnings(&body)?;
        Ok(parse_submission_id(&body))
    }

    /// One REST round trip: form-encoded POST, JSON back, error keys
    /// rejected.
    async fn rest(
        &self,
        token: &str,
        wsfunction: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, LmsError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("wstoken", token),
            ("wsfunction", wsfunction),
            ("moodlewsrestformat", "json"),
        ];
        form.extend_from_slice(params);

        debug!(wsfunction, "calling Moodle web service");
        self.post_form(REST_ENDPOINT, &form).await
    }

    async fn post_form(&self, endpoint: &str, form: &[(&str, &str)]) -> Result<Value, LmsError> {
        let response = self
            .http
            .post(format!("{}{endpoint}", self.base_url))
            .form(form)
            .send()
            .await
            .map_err(map_transport)?;

        if response.status().is_server_error() {
            return Err(LmsError::transport(format!(
                "LMS answered {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| LmsError::unknown(format!("LMS response is not JSON: {e}")))?;
        check_body(body)
    }
}

fn map_transport(err: reqwest::Error) -> LmsError {
    if err.is_timeout() {
        warn!(error = %err, "LMS call timed out");
    }
    LmsError::transport(format!("LMS transport failure: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_errorcodes() {
        assert_eq!(classify_errorcode("invalidtoken"), LmsErrorKind::AuthInvalid);
        assert_eq!(classify_errorcode("tokennotfound"), LmsErrorKind::AuthInvalid);
        assert_eq!(classify_errorcode("nopermissions"), LmsErrorKind::Authz);
        assert_eq!(classify_errorcode("maxbytes"), LmsErrorKind::PayloadReject);
        assert_eq!(classify_errorcode("invalidfiletype"), LmsErrorKind::PayloadReject);
        assert_eq!(classify_errorcode("unexpectedthing"), LmsErrorKind::Unknown);
    }

    #[test]
    fn http_200_error_bodies_are_errors() {
        let body = json!({
            "exception": "webservice_access_exception",
            "errorcode": "accessexception",
            "message": "Access denied",
        });
        let err = check_body(body).unwrap_err();
        assert_eq!(err.kind, LmsErrorKind::Authz);
        assert_eq!(err.errorcode.as_deref(), Some("accessexception"));

        assert!(check_body(json!({"userid": 42})).is_ok());
        assert!(check_body(json!([{"itemid": 7}])).is_ok());
    }

    #[test]
    fn parses_site_info() {
        let info = parse_site_info(&json!({
            "userid": 42,
            "username": "22007928",
            "fullname": "Santhan Kumar",
        }))
        .unwrap();
        assert_eq!(info.user_id, 42);
        assert_eq!(info.username, "22007928");

        assert!(parse_site_info(&json!({"username": "x"})).is_err());
    }

    #[test]
    fn parses_user_lookup_list() {
        let found = parse_user_list(&json!([
            {"id": 42, "username": "22007928", "email": "santhan@university.edu"}
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(found.id, 42);
        assert_eq!(found.email.as_deref(), Some("santhan@university.edu"));

        assert!(parse_user_list(&json!([])).unwrap().is_none());
        assert!(parse_user_list(&json!({"not": "a list"})).is_err());
    }

    #[test]
    fn parses_upload_item_id() {
        assert_eq!(
            parse_upload_response(&json!([{"itemid": 123456, "filename": "a.pdf"}])).unwrap(),
            123456
        );
        assert!(parse_upload_response(&json!([])).is_err());
    }

    #[test]
    fn submission_id_is_optional() {
        assert_eq!(parse_submission_id(&json!({"submissionid": 777})), Some(777));
        assert_eq!(parse_submission_id(&json!(null)), None);
        assert_eq!(parse_submission_id(&json!([])), None);
    }

    #[test]
    fn warnings_surface_as_classified_errors() {
        let body = json!([{"warningcode": "maxbytes", "message": "File too large"}]);
        let err = check_warnings(&body).unwrap_err();
        assert_eq!(err.kind, LmsErrorKind::PayloadReject);

        assert!(check_warnings(&json!(null)).is_ok());
        assert!(check_warnings(&json!([])).is_ok());
    }

    #[test]
    fn lms_errors_map_into_the_core_taxonomy() {
        let to_core = |kind| {
            CoreError::from(LmsError {
                kind,
                errorcode: None,
                message: "x".to_string(),
            })
            .kind()
        };
        assert_eq!(to_core(LmsErrorKind::Transient), "UPSTREAM_TRANSIENT");
        assert_eq!(to_core(LmsErrorKind::Unknown), "UPSTREAM_TRANSIENT");
        assert_eq!(to_core(LmsErrorKind::AuthInvalid), "AUTH_INVALID");
        assert_eq!(to_core(LmsErrorKind::Authz), "AUTHZ");
        assert_eq!(to_core(LmsErrorKind::PayloadReject), "UPSTREAM_REJECT");
    }
}
