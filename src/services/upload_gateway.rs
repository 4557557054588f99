//! Upload validation and staging.
//!
//! Everything here runs before any persistence: a rejected upload never
//! touches the content store or the metadata repository.

use crate::models::file::DEFAULT_FOLDER;
use bytes::Bytes;
use thiserror::Error;

/// Extensions accepted for upload, compared case-insensitively.
pub const ALLOWED_EXTENSIONS: [&str; 7] = ["txt", "pdf", "png", "jpg", "jpeg", "gif", "docx"];

const MAX_NAME_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 2000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("file type of `{0}` is not allowed")]
    InvalidFileType(String),
    #[error("invalid file name `{0}`")]
    InvalidName(String),
}

/// An upload as received from the transport, untrusted.
#[derive(Debug, Clone)]
pub struct RawUpload {
    pub filename: String,
    pub folder: Option<String>,
    pub description: Option<String>,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// An upload that passed validation and is ready to persist.
#[derive(Debug, Clone)]
pub struct StagedUpload {
    pub name: String,
    pub folder: String,
    pub description: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub bytes: Bytes,
}

/// Validate the name and type of `raw` and normalize its fields.
pub fn validate_and_stage(raw: RawUpload) -> Result<StagedUpload, ValidationError> {
    if !has_allowed_extension(&raw.filename) {
        return Err(ValidationError::InvalidFileType(raw.filename));
    }

    let name = secure_name(&raw.filename);
    if name.is_empty() || name.len() > MAX_NAME_LEN || !has_allowed_extension(&name) {
        return Err(ValidationError::InvalidName(raw.filename));
    }

    let folder = raw
        .folder
        .as_deref()
        .map(secure_name)
        .filter(|f| !f.is_empty())
        .unwrap_or_else(|| DEFAULT_FOLDER.to_string());

    let description: String = raw
        .description
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
        .take(MAX_DESCRIPTION_LEN)
        .collect();

    let content_type = raw
        .content_type
        .map(|ct| ct.trim().to_string())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| mime_guess::from_path(&name).first_or_octet_stream().to_string());

    Ok(StagedUpload {
        size_bytes: raw.bytes.len() as i64,
        name,
        folder,
        description,
        content_type,
        bytes: raw.bytes,
    })
}

/// True when `filename` ends in `.<ext>` for an allowed `ext`.
pub fn has_allowed_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| {
            ALLOWED_EXTENSIONS
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Reduce `raw` to a single safe path component.
///
/// Path separators become whitespace, whitespace runs collapse to `_`,
/// anything outside `[A-Za-z0-9_.-]` is dropped, and leading or trailing
/// `.`/`_` are trimmed so `..` and hidden names cannot survive.
pub fn secure_name(raw: &str) -> String {
    let spaced: String = raw
        .chars()
        .map(|c| if matches!(c, '/' | '\\') { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");

    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}
