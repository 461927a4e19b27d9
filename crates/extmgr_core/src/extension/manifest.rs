//! Extension manifest resolution.
//!
//! # Responsibility
//! - Locate `extension.json` at a load context root.
//! - Extract the entry-point identifier from the `class` field.
//!
//! # Invariants
//! - Only the `class` field is interpreted; unknown fields are ignored.
//! - A blank entry-point identifier is malformed, not "not found".

use crate::extension::context::LoadContext;
use crate::extension::error::{ExtensionError, ExtensionResult};
use log::debug;
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Fixed resource name of the manifest inside a package.
pub const MANIFEST_RESOURCE: &str = "extension.json";
/// Manifest field naming the entry-point type.
pub const ENTRY_POINT_FIELD: &str = "class";

/// Parsed manifest. Transient: consumed once during load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    /// Fully-qualified entry-point identifier, e.g. `com.example.Greeter`.
    pub entry_point: String,
}

impl Manifest {
    /// Parses manifest bytes as a single JSON object.
    pub fn parse(raw: &[u8]) -> Result<Self, ManifestError> {
        let parsed: Value =
            serde_json::from_slice(raw).map_err(|err| ManifestError::InvalidJson(err.to_string()))?;
        let Value::Object(fields) = parsed else {
            return Err(ManifestError::NotAnObject);
        };

        match fields.get(ENTRY_POINT_FIELD) {
            None | Some(Value::Null) => Err(ManifestError::MissingField(ENTRY_POINT_FIELD)),
            Some(Value::String(value)) => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return Err(ManifestError::BlankField(ENTRY_POINT_FIELD));
                }
                Ok(Self {
                    entry_point: trimmed.to_string(),
                })
            }
            Some(_) => Err(ManifestError::FieldNotString(ENTRY_POINT_FIELD)),
        }
    }
}

/// Reads and parses the manifest of one load context.
///
/// # Errors
/// - `ManifestMissing` when the context root has no `extension.json`.
/// - `ManifestMalformed` when the resource cannot be interpreted.
/// - `Package` when the resource exists but cannot be read.
pub fn resolve_manifest(context: &LoadContext) -> ExtensionResult<Manifest> {
    let raw = context
        .resource(MANIFEST_RESOURCE)
        .map_err(|source| ExtensionError::Package {
            path: context.source_path().to_path_buf(),
            source,
        })?
        .ok_or_else(|| ExtensionError::ManifestMissing(context.source_path().to_path_buf()))?;

    let manifest = Manifest::parse(&raw).map_err(|source| ExtensionError::ManifestMalformed {
        path: context.source_path().to_path_buf(),
        source,
    })?;
    debug!(
        "event=manifest_resolve module=extension status=ok context_id={} entry_point={}",
        context.id(),
        manifest.entry_point
    );
    Ok(manifest)
}

/// Manifest interpretation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    InvalidJson(String),
    NotAnObject,
    MissingField(&'static str),
    FieldNotString(&'static str),
    BlankField(&'static str),
}

impl Display for ManifestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidJson(details) => write!(f, "manifest is not valid JSON: {details}"),
            Self::NotAnObject => write!(f, "manifest must be a single JSON object"),
            Self::MissingField(name) => write!(f, "manifest missing required field: {name}"),
            Self::FieldNotString(name) => write!(f, "manifest field must be a string: {name}"),
            Self::BlankField(name) => write!(f, "manifest field must not be blank: {name}"),
        }
    }
}

impl Error for ManifestError {}

#[cfg(test)]
mod tests {
    use super::{Manifest, ManifestError};

    #[test]
    fn extracts_entry_point_and_ignores_unknown_fields() {
        let manifest =
            Manifest::parse(br#"{"class": "com.example.Greeter", "author": "someone"}"#)
                .expect("valid manifest");
        assert_eq!(manifest.entry_point, "com.example.Greeter");
    }

    #[test]
    fn trims_entry_point() {
        let manifest = Manifest::parse(br#"{"class": "  demo.Trimmed  "}"#).expect("parse");
        assert_eq!(manifest.entry_point, "demo.Trimmed");
    }

    #[test]
    fn rejects_invalid_json() {
        let err = Manifest::parse(b"{class: nope").unwrap_err();
        assert!(matches!(err, ManifestError::InvalidJson(_)));
    }

    #[test]
    fn rejects_non_object_documents() {
        assert_eq!(
            Manifest::parse(br#"["demo.Greeter"]"#).unwrap_err(),
            ManifestError::NotAnObject
        );
        assert_eq!(
            Manifest::parse(br#""demo.Greeter""#).unwrap_err(),
            ManifestError::NotAnObject
        );
    }

    #[test]
    fn rejects_missing_or_null_class() {
        assert_eq!(
            Manifest::parse(br#"{"name": "demo"}"#).unwrap_err(),
            ManifestError::MissingField("class")
        );
        assert_eq!(
            Manifest::parse(br#"{"class": null}"#).unwrap_err(),
            ManifestError::MissingField("class")
        );
    }

    #[test]
    fn rejects_non_string_class() {
        assert_eq!(
            Manifest::parse(br#"{"class": 42}"#).unwrap_err(),
            ManifestError::FieldNotString("class")
        );
    }

    #[test]
    fn rejects_blank_class() {
        assert_eq!(
            Manifest::parse(br#"{"class": "   "}"#).unwrap_err(),
            ManifestError::BlankField("class")
        );
    }
}
