use serde::{Deserialize, Serialize};
use xreg_types::SPECVERSION;

use crate::error::{ModelError, ModelResult};

/// Every flag this server understands.
pub const SUPPORTED_FLAGS: &[&str] = &[
    "doc",
    "epoch",
    "filter",
    "inline",
    "nodefaultversionid",
    "nodefaultversionsticky",
    "noepoch",
    "noreadonly",
    "offered",
    "schema",
    "setdefaultversionid",
    "specversion",
];

/// Every mutable aspect of the registry.
pub const SUPPORTED_MUTABLE: &[&str] = &["capabilities", "entities", "model"];

pub fn default_schema() -> String {
    format!("xregistry-json/{SPECVERSION}")
}

/// The registry's capabilities document.
///
/// List fields are kept sorted and deduplicated; field order matches the
/// rendered document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Capabilities {
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub mutable: Vec<String>,
    #[serde(default)]
    pub pagination: bool,
    #[serde(default)]
    pub schemas: Vec<String>,
    #[serde(default)]
    pub shortself: bool,
    #[serde(default)]
    pub specversions: Vec<String>,
    #[serde(default)]
    pub sticky: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            flags: SUPPORTED_FLAGS.iter().map(|s| s.to_string()).collect(),
            mutable: SUPPORTED_MUTABLE.iter().map(|s| s.to_string()).collect(),
            pagination: false,
            schemas: vec![default_schema()],
            shortself: false,
            specversions: vec![SPECVERSION.to_string()],
            sticky: true,
        }
    }
}

fn normalize_list(field: &str, list: &mut Vec<String>, supported: &[&str]) -> ModelResult<()> {
    if list.iter().any(|v| v == "*") {
        *list = supported.iter().map(|s| s.to_string()).collect();
        return Ok(());
    }
    for v in list.iter_mut() {
        *v = v.to_ascii_lowercase();
        if !supported.contains(&v.as_str()) {
            return Err(ModelError::Capability(format!(
                "Unknown \"{field}\" value: \"{v}\""
            )));
        }
    }
    list.sort();
    list.dedup();
    Ok(())
}

impl Capabilities {
    /// Parse and validate a capabilities document from a client.
    pub fn parse(buf: &[u8]) -> ModelResult<Self> {
        let mut caps: Capabilities = serde_json::from_slice(buf).map_err(|e| {
            ModelError::Capability(format!("Error parsing capabilities: {e}"))
        })?;
        caps.validate()?;
        Ok(caps)
    }

    /// Normalize and check every field. Missing schema and specversion
    /// lists fall back to the server defaults.
    pub fn validate(&mut self) -> ModelResult<()> {
        normalize_list("flags", &mut self.flags, SUPPORTED_FLAGS)?;
        normalize_list("mutable", &mut self.mutable, SUPPORTED_MUTABLE)?;

        if self.pagination {
            return Err(ModelError::Capability(
                "\"pagination\" must be \"false\"".into(),
            ));
        }
        if self.shortself {
            return Err(ModelError::Capability(
                "\"shortself\" must be \"false\"".into(),
            ));
        }

        let schema = default_schema();
        if self.schemas.is_empty() {
            self.schemas.push(schema.clone());
        }
        for s in &self.schemas {
            if !s.eq_ignore_ascii_case(&schema) {
                return Err(ModelError::Capability(format!(
                    "Unknown \"schemas\" value: \"{s}\""
                )));
            }
        }
        self.schemas = vec![schema];

        if self.specversions.is_empty() {
            self.specversions.push(SPECVERSION.to_string());
        }
        for s in &self.specversions {
            if !s.eq_ignore_ascii_case(SPECVERSION) {
                return Err(ModelError::Capability(format!(
                    "Unknown \"specversions\" value: \"{s}\""
                )));
            }
        }
        self.specversions = vec![SPECVERSION.to_string()];
        Ok(())
    }

    pub fn has_flag(&self, flag: &str) -> bool {
        self.flags.iter().any(|f| f == flag)
    }

    pub fn is_mutable(&self, what: &str) -> bool {
        self.mutable.iter().any(|m| m == what)
    }

    /// The document of supported values, returned for `?offered`.
    pub fn offered() -> serde_json::Value {
        serde_json::json!({
            "flags": { "type": "string", "enum": SUPPORTED_FLAGS },
            "mutable": { "type": "string", "enum": SUPPORTED_MUTABLE },
            "pagination": { "type": "boolean", "enum": [false] },
            "schemas": { "type": "string", "enum": [default_schema()] },
            "shortself": { "type": "boolean", "enum": [false] },
            "specversions": { "type": "string", "enum": [SPECVERSION] },
            "sticky": { "type": "boolean", "enum": [false, true] },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_document_shape() {
        let caps = Capabilities::default();
        let doc = serde_json::to_value(&caps).unwrap();
        let keys: Vec<&String> = doc.as_object().unwrap().keys().collect();
        assert_eq!(
            keys,
            vec!["flags", "mutable", "pagination", "schemas", "shortself", "specversions", "sticky"]
        );
        assert_eq!(doc["flags"].as_array().unwrap().len(), 12);
        assert_eq!(doc["schemas"][0], format!("xregistry-json/{SPECVERSION}"));
        assert!(caps.has_flag("filter"));
        assert!(caps.is_mutable("model"));
    }

    #[test]
    fn parse_normalizes() {
        let caps = Capabilities::parse(br#"{"flags": ["inline", "DOC", "inline"], "mutable": ["*"]}"#)
            .unwrap();
        assert_eq!(caps.flags, vec!["doc", "inline"]);
        assert_eq!(caps.mutable.len(), 3);
        assert_eq!(caps.specversions, vec![SPECVERSION.to_string()]);
        assert!(!caps.sticky);
        assert!(!caps.has_flag("filter"));
    }

    #[test]
    fn parse_rejects_unsupported() {
        for doc in [
            r#"{"flags": ["bogus"]}"#,
            r#"{"pagination": true}"#,
            r#"{"specversions": ["0.1"]}"#,
            r#"{"unknown": 1}"#,
            r#"not json"#,
        ] {
            assert!(Capabilities::parse(doc.as_bytes()).is_err(), "{doc}");
        }
        let err = Capabilities::parse(br#"{"mutable": ["x"]}"#).unwrap_err();
        assert_eq!(err.to_string(), "Unknown \"mutable\" value: \"x\"");
    }

    #[test]
    fn offered_lists_flags() {
        let doc = Capabilities::offered();
        assert_eq!(doc["flags"]["enum"].as_array().unwrap().len(), SUPPORTED_FLAGS.len());
    }
}
