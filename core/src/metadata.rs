//! Schema validation for fetched metadata payloads. Runs at dispatch time,
//! after persistence, so a malformed payload is still visible on the hash
//! record for inspection.

use serde_json::Value;

use bintriage_protocol::BinaryMetadata;

use crate::error::ValidationError;

/// Validate a raw payload into [`BinaryMetadata`]. Required fields are
/// `sha256` (64 hex chars), `url`, `file_size` and `file_available`;
/// everything else is carried through when present and well-typed.
pub fn validate_metadata(payload: &Value) -> Result<BinaryMetadata, ValidationError> {
    let object = payload.as_object().ok_or(ValidationError::NotAnObject)?;

    let sha256 = require_str(object, "sha256")?;
    if !is_sha256(sha256) {
        return Err(ValidationError::InvalidSha256(sha256.to_string()));
    }
    let url = require_str(object, "url")?;
    let file_size = match object.get("file_size") {
        Some(value) => value
            .as_u64()
            .ok_or(ValidationError::InvalidField { field: "file_size" })?,
        None => return Err(ValidationError::MissingField("file_size")),
    };
    let file_available = match object.get("file_available") {
        Some(value) => value.as_bool().ok_or(ValidationError::InvalidField {
            field: "file_available",
        })?,
        None => return Err(ValidationError::MissingField("file_available")),
    };

    Ok(BinaryMetadata {
        sha256: sha256.to_string(),
        url: url.to_string(),
        file_size,
        file_available,
        md5: optional_str(object, "md5")?,
        original_filename: optional_str(object, "original_filename")?,
        file_description: optional_str(object, "file_description")?,
        product_name: optional_str(object, "product_name")?,
        os_type: optional_str(object, "os_type")?,
        architecture: optional_str(object, "architecture")?,
    })
}

fn require_str<'a>(
    object: &'a serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ValidationError> {
    match object.get(field) {
        Some(value) => value
            .as_str()
            .ok_or(ValidationError::InvalidField { field }),
        None => Err(ValidationError::MissingField(field)),
    }
}

fn optional_str(
    object: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, ValidationError> {
    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or(ValidationError::InvalidField { field }),
    }
}

fn is_sha256(candidate: &str) -> bool {
    candidate.len() == 64 && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}
