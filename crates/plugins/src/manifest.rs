//! `warren.plugin.json` parsing and validation.

use std::collections::HashSet;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
};

/// File name of the manifest inside a plugin directory.
pub const MANIFEST_FILE: &str = "warren.plugin.json";

const MAX_ID_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Plugin option name to JSON-schema fragment.
    #[serde(default)]
    pub config_schema: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<Vec<String>>,
}

impl PluginManifest {
    /// Manifest with only an id, as bundled plugins use.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            version: None,
            description: None,
            config_schema: Map::new(),
            channels: None,
            skills: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

/// Every constraint a manifest document broke.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid plugin manifest: {}", describe_violations(.violations))]
pub struct ManifestError {
    pub violations: Vec<FieldViolation>,
}

fn describe_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| {
            if v.field.is_empty() {
                v.message.clone()
            } else {
                format!("{}: {}", v.field, v.message)
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Valid plugin, tool and channel identifiers: ASCII alphanumerics plus
/// `.`, `_` and `-`, not starting with punctuation.
pub fn is_valid_identifier(id: &str) -> bool {
    let mut chars = id.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    id.len() <= MAX_ID_LEN
        && first.is_ascii_alphanumeric()
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Validate a parsed manifest document.
///
/// Collects every violation rather than stopping at the first one. Unknown
/// fields are ignored.
pub fn validate_manifest(doc: &Value) -> Result<PluginManifest, ManifestError> {
    let mut violations = Vec::new();
    let mut violate = |field: &str, message: String| {
        violations.push(FieldViolation {
            field: field.to_string(),
            message,
        });
    };

    let Some(obj) = doc.as_object() else {
        violate("", "manifest must be a JSON object".into());
        return Err(ManifestError { violations });
    };

    match obj.get("id") {
        None | Some(Value::Null) => violate("id", "is required".into()),
        Some(Value::String(id)) if id.trim().is_empty() => {
            violate("id", "must not be empty".into());
        },
        Some(Value::String(id)) if !is_valid_identifier(id) => violate(
            "id",
            format!(
                "\"{id}\" must be at most {MAX_ID_LEN} characters of [A-Za-z0-9._-] starting with a letter or digit"
            ),
        ),
        Some(Value::String(_)) => {},
        Some(_) => violate("id", "must be a string".into()),
    }

    for field in ["name", "version", "description"] {
        if let Some(v) = obj.get(field)
            && !v.is_null()
            && !v.is_string()
        {
            violate(field, "must be a string".into());
        }
    }

    match obj.get("configSchema") {
        None => {},
        Some(Value::Object(schema)) => {
            for (option, fragment) in schema {
                if !fragment.is_object() && !fragment.is_boolean() {
                    violate(
                        &format!("configSchema.{option}"),
                        "must be a schema object".into(),
                    );
                }
            }
        },
        Some(_) => violate("configSchema", "must be an object".into()),
    }

    for field in ["channels", "skills"] {
        match obj.get(field) {
            None | Some(Value::Null) => {},
            Some(Value::Array(items)) => {
                let mut seen = HashSet::new();
                for (i, item) in items.iter().enumerate() {
                    let path = format!("{field}[{i}]");
                    match item.as_str() {
                        Some(s) if s.trim().is_empty() => {
                            violate(&path, "must not be empty".into());
                        },
                        Some(s) if !seen.insert(s) => {
                            violate(&path, format!("duplicate entry \"{s}\""));
                        },
                        Some(_) => {},
                        None => violate(&path, "must be a string".into()),
                    }
                }
            },
            Some(_) => violate(field, "must be an array of strings".into()),
        }
    }

    if !violations.is_empty() {
        return Err(ManifestError { violations });
    }

    serde_json::from_value(doc.clone()).map_err(|e| ManifestError {
        violations: vec![FieldViolation {
            field: String::new(),
            message: e.to_string(),
        }],
    })
}

/// Parse and validate manifest bytes as read from disk.
pub fn parse_manifest(bytes: &[u8]) -> Result<PluginManifest, ManifestError> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|e| ManifestError {
        violations: vec![FieldViolation {
            field: String::new(),
            message: format!("not valid JSON: {e}"),
        }],
    })?;
    validate_manifest(&doc)
}
