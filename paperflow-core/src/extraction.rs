//! Remote AI extraction client.
//!
//! Posts scanned bytes to the inference service and gates the result on a
//! confidence threshold. Any transport or contract failure degrades to the
//! strict filename parser, so an offline inference service never blocks
//! ingestion.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{info, warn};

use crate::identity::{self, ParsedFilename};
use crate::model::ExamType;

/// The service may cold-start; first requests can take minutes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.75;

/// Wire contract of the inference service.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub register_number: Option<String>,
    #[serde(default)]
    pub register_confidence: Option<f64>,
    #[serde(default)]
    pub subject_code: Option<String>,
    #[serde(default)]
    pub subject_confidence: Option<f64>,
    #[serde(default)]
    pub suggested_filename: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Confident identity accepted from the remote service.
#[derive(Debug, Clone, PartialEq)]
pub struct InferredIdentity {
    pub register_number: String,
    pub subject_code: String,
    pub register_confidence: f64,
    pub subject_confidence: f64,
}

/// How an upload's identity was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Remote extraction above the confidence threshold; artifact is
    /// renamed and flagged `auto_processed`.
    Remote(InferredIdentity),
    /// Remote answered below threshold; kept for the manual-review queue.
    LowConfidence {
        register_number: Option<String>,
        subject_code: Option<String>,
    },
    /// Remote unusable; identity taken from the filename.
    Filename(ParsedFilename),
    /// Nothing recognisable; stored unassigned for staff review.
    None,
}

#[derive(Clone)]
pub struct ExtractionClient {
    base_url: Option<String>,
    threshold: f64,
    http: reqwest::Client,
}

impl ExtractionClient {
    /// An empty base URL disables remote extraction entirely.
    pub fn new(base_url: &str) -> Self {
        Self::with_threshold(base_url, DEFAULT_CONFIDENCE_THRESHOLD)
    }

    pub fn with_threshold(base_url: &str, threshold: f64) -> Self {
        let trimmed = base_url.trim().trim_end_matches('/');
        Self {
            base_url: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            threshold,
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client construction cannot fail"),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    pub async fn health(&self) -> bool {
        let Some(base) = &self.base_url else {
            return false;
        };
        match self
            .http
            .get(format!("{base}/health"))
            .timeout(HEALTH_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(err) => {
                warn!(error = %err, "extraction health check failed");
                false
            }
        }
    }

    /// Raw remote call. `None` covers every degraded case: disabled,
    /// timeout, network error, non-2xx, malformed body, unsuccessful
    /// extraction.
    pub async fn extract(&self, content: &[u8], filename: &str) -> Option<ExtractionResponse> {
        let base = self.base_url.as_ref()?;

        let part = Part::bytes(content.to_vec()).file_name(filename.to_string());
        let form = Form::new().part("file", part);

        let response = match self
            .http
            .post(format!("{base}/extract"))
            .multipart(form)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "remote extraction request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "remote extraction returned non-success");
            return None;
        }

        match response.json::<ExtractionResponse>().await {
            Ok(parsed) if parsed.success => Some(parsed),
            Ok(parsed) => {
                warn!(error = ?parsed.error, "remote extraction reported failure");
                None
            }
            Err(err) => {
                warn!(error = %err, "remote extraction returned malformed JSON");
                None
            }
        }
    }

    /// Resolve an upload's identity: remote first, filename parse as the
    /// degraded path.
    pub async fn resolve(&self, content: &[u8], filename: &str) -> Resolution {
        if let Some(response) = self.extract(content, filename).await {
            let resolution = classify_response(&response, self.threshold);
            if let Resolution::Remote(identity) = &resolution {
                info!(
                    register = %identity.register_number,
                    subject = %identity.subject_code,
                    "remote extraction accepted"
                );
                return resolution;
            }
            // Below threshold or unusable fields: prefer a clean filename
            // parse over a dubious guess.
            if let Some(parsed) = identity::try_parse_filename(filename) {
                return Resolution::Filename(parsed);
            }
            return resolution;
        }

        match identity::try_parse_filename(filename) {
            Some(parsed) => Resolution::Filename(parsed),
            None => Resolution::None,
        }
    }
}

/// Threshold gate over a successful response. Fields that fail local
/// validation (wrong register format, bad subject) demote the result to
/// low-confidence regardless of the reported scores.
pub fn classify_response(response: &ExtractionResponse, threshold: f64) -> Resolution {
    let register = response
        .register_number
        .as_deref()
        .map(str::trim)
        .filter(|r| identity::validate_register_number(r).is_ok())
        .map(str::to_string);
    let subject = response
        .subject_code
        .as_deref()
        .and_then(|s| identity::normalize_subject_code(s).ok());

    let register_confidence = response.register_confidence.unwrap_or(0.0);
    let subject_confidence = response.subject_confidence.unwrap_or(0.0);
    let confident = register_confidence >= threshold && subject_confidence >= threshold;

    match (register, subject) {
        (Some(register_number), Some(subject_code)) if confident => {
            Resolution::Remote(InferredIdentity {
                register_number,
                subject_code,
                register_confidence,
                subject_confidence,
            })
        }
        (register_number, subject_code) => Resolution::LowConfidence {
            register_number,
            subject_code,
        },
    }
}

/// Canonical filename for an accepted inference result.
pub fn renamed_filename(identity: &InferredIdentity, exam_type: ExamType, extension: &str) -> String {
    identity::canonical_filename(
        &identity.register_number,
        &identity.subject_code,
        exam_type,
        extension,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(reg_conf: f64, sub_conf: f64) -> ExtractionResponse {
        ExtractionResponse {
            success: true,
            register_number: Some("212222240047".to_string()),
            register_confidence: Some(reg_conf),
            subject_code: Some("19AI405".to_string()),
            subject_confidence: Some(sub_conf),
            suggested_filename: None,
            error: None,
        }
    }

    #[test]
    fn accepts_above_threshold() {
        let resolution = classify_response(&response(0.93, 0.88), 0.75);
        match resolution {
            Resolution::Remote(identity) => {
                assert_eq!(identity.register_number, "212222240047");
                assert_eq!(identity.subject_code, "19AI405");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }

    #[test]
    fn demotes_below_threshold() {
        let resolution = classify_response(&response(0.93, 0.60), 0.75);
        assert!(matches!(resolution, Resolution::LowConfidence { .. }));
    }

    #[test]
    fn demotes_invalid_register_format() {
        let mut resp = response(0.99, 0.99);
        resp.register_number = Some("12345".to_string());
        let resolution = classify_response(&resp, 0.75);
        match resolution {
            Resolution::LowConfidence {
                register_number,
                subject_code,
            } => {
                assert_eq!(register_number, None);
                assert_eq!(subject_code, Some("19AI405".to_string()));
            }
            other => panic!("expected LowConfidence, got {other:?}"),
        }
    }

    #[test]
    fn missing_confidences_read_as_zero() {
        let mut resp = response(0.9, 0.9);
        resp.register_confidence = None;
        assert!(matches!(
            classify_response(&resp, 0.75),
            Resolution::LowConfidence { .. }
        ));
    }

    #[test]
    fn renamed_filename_uses_canonical_form() {
        let identity = InferredIdentity {
            register_number: "212222240047".to_string(),
            subject_code: "19AI405".to_string(),
            register_confidence: 0.9,
            subject_confidence: 0.9,
        };
        assert_eq!(
            renamed_filename(&identity, ExamType::Cia1, "pdf"),
            "212222240047_19AI405_CIA1.pdf"
        );
    }

    #[test]
    fn disabled_client_reports_not_enabled() {
        assert!(!ExtractionClient::new("").is_enabled());
        assert!(!ExtractionClient::new("   ").is_enabled());
        assert!(ExtractionClient::new("http://inference.local/").is_enabled());
    }

    #[tokio::test]
    async fn disabled_client_resolves_from_filename() {
        let client = ExtractionClient::new("");
        let resolution = client.resolve(b"%PDF-1.4", "212222240047_19AI405.pdf").await;
        match resolution {
            Resolution::Filename(parsed) => {
                assert_eq!(parsed.register_number, "212222240047");
            }
            other => panic!("expected Filename, got {other:?}"),
        }

        let none = client.resolve(b"%PDF-1.4", "scan_0001.pdf").await;
        assert_eq!(none, Resolution::None);
    }
}
