//! Filename parsing, content validation and idempotency fingerprints.
//!
//! Two parsing modes cover the upload surface: strict mode requires the
//! legacy `{register}_{subject}[_{exam}].{ext}` convention, flexible mode
//! accepts any filename and defers identity to the extraction pipeline.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::ExamType;

/// Strict legacy convention: 12-digit register, 2-10 alphanumeric subject,
/// optional exam-type segment, known extension.
static STRICT_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{12})_([A-Za-z0-9]{2,10})(?:_([A-Za-z0-9]{1,10}))?\.(pdf|jpg|jpeg|png)$")
        .expect("strict filename regex is valid")
});

static SUBJECT_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{2,10}$").expect("subject code regex is valid"));

const MAGIC_PDF: &[u8] = b"%PDF";
const MAGIC_JPEG: &[u8] = &[0xFF, 0xD8];
const MAGIC_PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47];

/// Identity parsed from a strict-mode filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedFilename {
    pub register_number: String,
    pub subject_code: String,
    pub exam_type: Option<ExamType>,
    pub extension: String,
}

/// Parse a strict-mode filename. Subject codes are normalised to
/// uppercase; the optional third segment names the exam type.
pub fn parse_filename(filename: &str) -> Result<ParsedFilename> {
    let captures = STRICT_FILENAME.captures(filename).ok_or_else(|| {
        CoreError::Validation(format!(
            "filename '{filename}' does not match REGISTER_SUBJECT.ext"
        ))
    })?;

    let register_number = captures[1].to_string();
    let subject_code = captures[2].to_ascii_uppercase();
    if !SUBJECT_CODE.is_match(&subject_code) {
        return Err(CoreError::Validation(format!(
            "invalid subject code: {subject_code}"
        )));
    }

    let exam_type = match captures.get(3) {
        Some(segment) => Some(ExamType::parse(segment.as_str())?),
        None => None,
    };

    Ok(ParsedFilename {
        register_number,
        subject_code,
        exam_type,
        extension: captures[4].to_ascii_lowercase(),
    })
}

/// Best-effort parse for flexible mode: `None` instead of an error when
/// the filename carries no recognisable identity.
pub fn try_parse_filename(filename: &str) -> Option<ParsedFilename> {
    parse_filename(filename).ok()
}

pub fn validate_register_number(value: &str) -> Result<()> {
    if value.len() == 12 && value.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(());
    }
    Err(CoreError::Validation(format!(
        "register number must be exactly 12 digits: {value}"
    )))
}

pub fn normalize_subject_code(value: &str) -> Result<String> {
    let upper = value.trim().to_ascii_uppercase();
    if SUBJECT_CODE.is_match(&upper) {
        Ok(upper)
    } else {
        Err(CoreError::Validation(format!("invalid subject code: {value}")))
    }
}

/// Detect the MIME type from leading magic bytes. Extension checks alone
/// are not trusted; content must agree.
pub fn sniff_mime_type(content: &[u8]) -> Option<&'static str> {
    if content.starts_with(MAGIC_PDF) {
        Some("application/pdf")
    } else if content.starts_with(MAGIC_JPEG) {
        Some("image/jpeg")
    } else if content.starts_with(MAGIC_PNG) {
        Some("image/png")
    } else {
        None
    }
}

pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        _ => "pdf",
    }
}

/// Validate the byte content against size and magic-byte constraints and
/// return the detected MIME type.
pub fn validate_content(content: &[u8], max_size_bytes: usize) -> Result<&'static str> {
    if content.is_empty() {
        return Err(CoreError::Validation("file is empty".to_string()));
    }
    if content.len() > max_size_bytes {
        return Err(CoreError::Validation(format!(
            "file exceeds maximum size of {} bytes",
            max_size_bytes
        )));
    }
    sniff_mime_type(content).ok_or_else(|| {
        CoreError::Validation("could not determine file type from content".to_string())
    })
}

/// SHA-256 of the exact byte content, hex encoded.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Deduplication key: hash of the parsed identity tuple combined with the
/// content hash. Re-uploading identical bytes for the same tuple always
/// produces the same fingerprint.
pub fn fingerprint(
    register_number: &str,
    subject_code: &str,
    exam_type: ExamType,
    content_hash: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(register_number.as_bytes());
    hasher.update(b"|");
    hasher.update(subject_code.as_bytes());
    hasher.update(b"|");
    hasher.update(exam_type.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(content_hash.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the canonical `{register}_{SUBJECT}_{EXAM}.{ext}` filename.
/// Short register numbers are left-padded with zeros to 12 digits.
pub fn canonical_filename(
    register_number: &str,
    subject_code: &str,
    exam_type: ExamType,
    extension: &str,
) -> String {
    format!(
        "{:0>12}_{}_{}.{}",
        register_number,
        subject_code.to_ascii_uppercase(),
        exam_type.as_str(),
        extension.trim_start_matches('.').to_ascii_lowercase()
    )
}

/// Strip path separators, traversal sequences and control characters from
/// a client-supplied filename. Empty results get a generated fallback.
pub fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .filter(|c| !c.is_control())
        .collect();
    let cleaned = cleaned.replace("..", "");
    let cleaned = cleaned.trim().trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        format!("file_{}", Uuid::new_v4().simple())
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PDF: &[u8] = b"%PDF-1.4 fake pdf content";
    const JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, b'j', b'p', b'g'];
    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn parses_strict_pdf_filename() {
        let parsed = parse_filename("212222240047_19AI405.pdf").unwrap();
        assert_eq!(parsed.register_number, "212222240047");
        assert_eq!(parsed.subject_code, "19AI405");
        assert_eq!(parsed.exam_type, None);
        assert_eq!(parsed.extension, "pdf");
    }

    #[test]
    fn parses_exam_type_segment() {
        let parsed = parse_filename("212222240047_19AI405_SEM.pdf").unwrap();
        assert_eq!(parsed.exam_type, Some(ExamType::Sem));
    }

    #[test]
    fn uppercases_subject_code() {
        let parsed = parse_filename("611221104088_ml.jpg").unwrap();
        assert_eq!(parsed.subject_code, "ML");
        assert_eq!(parsed.extension, "jpg");
    }

    #[test]
    fn rejects_malformed_filenames() {
        assert!(parse_filename("").is_err());
        assert!(parse_filename("scan_0001.pdf").is_err());
        assert!(parse_filename("212222240047_19AI405").is_err());
        assert!(parse_filename("212222240047_19AI405.exe").is_err());
        assert!(parse_filename("12345_ML.pdf").is_err()); // short register
        assert!(parse_filename("212222240047_X.pdf").is_err()); // short subject
    }

    #[test]
    fn try_parse_returns_none_for_arbitrary_names() {
        assert!(try_parse_filename("scan_0001.pdf").is_none());
        assert!(try_parse_filename("212222240047_19AI405.pdf").is_some());
    }

    #[test]
    fn sniffs_known_magic_bytes() {
        assert_eq!(sniff_mime_type(PDF), Some("application/pdf"));
        assert_eq!(sniff_mime_type(JPEG), Some("image/jpeg"));
        assert_eq!(sniff_mime_type(PNG), Some("image/png"));
        assert_eq!(sniff_mime_type(b"not a known format"), None);
    }

    #[test]
    fn validates_content_size_and_type() {
        assert_eq!(validate_content(PDF, 1024).unwrap(), "application/pdf");
        assert!(validate_content(PDF, 4).is_err());
        assert!(validate_content(b"", 1024).is_err());
        assert!(validate_content(b"garbage", 1024).is_err());
    }

    #[test]
    fn content_hash_is_deterministic_sha256() {
        let a = content_hash(b"hello world pdf content");
        let b = content_hash(b"hello world pdf content");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(content_hash(b"file_a"), content_hash(b"file_b"));
    }

    #[test]
    fn fingerprint_depends_on_every_component() {
        let hash = content_hash(PDF);
        let base = fingerprint("212222240047", "19AI405", ExamType::Cia1, &hash);
        assert_eq!(
            base,
            fingerprint("212222240047", "19AI405", ExamType::Cia1, &hash)
        );
        assert_ne!(
            base,
            fingerprint("212222240048", "19AI405", ExamType::Cia1, &hash)
        );
        assert_ne!(
            base,
            fingerprint("212222240047", "ML", ExamType::Cia1, &hash)
        );
        assert_ne!(
            base,
            fingerprint("212222240047", "19AI405", ExamType::Cia2, &hash)
        );
    }

    #[test]
    fn canonical_filename_pads_and_uppercases() {
        assert_eq!(
            canonical_filename("212222240047", "19ai405", ExamType::Cia1, "pdf"),
            "212222240047_19AI405_CIA1.pdf"
        );
        let padded = canonical_filename("12345", "ML", ExamType::Cia1, ".jpg");
        assert!(padded.starts_with("0000000"));
        assert!(padded.ends_with("_ML_CIA1.jpg"));
    }

    #[test]
    fn sanitize_strips_traversal_and_markup() {
        let cleaned = sanitize_filename("../../etc/passwd");
        assert!(!cleaned.contains(".."));
        assert!(!cleaned.contains('/'));

        let cleaned = sanitize_filename("file<script>alert('x')</script>.pdf");
        assert!(!cleaned.contains('<'));
        assert!(!cleaned.contains('>'));

        assert_eq!(
            sanitize_filename("212222240047_19AI405.pdf"),
            "212222240047_19AI405.pdf"
        );

        let fallback = sanitize_filename("");
        assert!(fallback.starts_with("file_"));
    }
}
