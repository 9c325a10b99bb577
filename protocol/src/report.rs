//! Validated binary metadata and the analysis artifacts produced from it.

use serde::Deserialize;
use serde::Serialize;

/// Metadata for one binary after schema validation. Only validated values
/// reach an analysis engine; the raw fetched payload is kept on the
/// `HashRecord` untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BinaryMetadata {
    pub sha256: String,
    /// Remote-storage locator for the binary contents.
    pub url: String,
    pub file_size: u64,
    pub file_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
}

/// Indicator of compromise attached to an analyzed binary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ioc {
    pub id: String,
    pub match_type: String,
    pub values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Always within 1..=10, clamped at construction and deserialization.
    #[serde(deserialize_with = "deserialize_severity")]
    pub severity: u8,
}

fn deserialize_severity<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let severity = u8::deserialize(deserializer)?;
    Ok(severity.clamp(1, 10))
}

impl Ioc {
    pub fn new(
        id: impl Into<String>,
        match_type: impl Into<String>,
        values: Vec<String>,
        severity: u8,
    ) -> Self {
        Self {
            id: id.into(),
            match_type: match_type.into(),
            values,
            field: None,
            severity: severity.clamp(1, 10),
        }
    }
}

/// Per-hash output of one engine invocation. Not persisted beyond delivery
/// to the report sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisResult {
    /// None when the metadata payload was too malformed to carry a hash.
    pub binary_hash: Option<String>,
    pub engine_name: String,
    pub iocs: Vec<Ioc>,
    pub success: bool,
}

impl AnalysisResult {
    /// Synthetic failure emitted when metadata fails schema validation;
    /// the engine is never invoked for these.
    pub fn validation_failure(binary_hash: Option<String>, engine_name: impl Into<String>) -> Self {
        Self {
            binary_hash,
            engine_name: engine_name.into(),
            iocs: Vec::new(),
            success: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn ioc_severity_is_clamped() {
        assert_eq!(Ioc::new("a", "equality", vec![], 0).severity, 1);
        assert_eq!(Ioc::new("b", "equality", vec![], 42).severity, 10);
        assert_eq!(Ioc::new("c", "equality", vec![], 7).severity, 7);
    }

    #[test]
    fn ioc_severity_is_clamped_on_deserialization() {
        let high: Ioc = serde_json::from_str(
            r#"{"id":"a","match_type":"equality","values":[],"severity":99}"#,
        )
        .expect("parse");
        assert_eq!(high.severity, 10);
        let low: Ioc = serde_json::from_str(
            r#"{"id":"b","match_type":"equality","values":[],"severity":0}"#,
        )
        .expect("parse");
        assert_eq!(low.severity, 1);
    }

    #[test]
    fn validation_failure_has_no_iocs() {
        let result = AnalysisResult::validation_failure(None, "yara");
        assert!(!result.success);
        assert!(result.iocs.is_empty());
        assert_eq!(result.engine_name, "yara");
    }
}
