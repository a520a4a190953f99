//! Property values and cross-resource references.
//!
//! Stack files express references as `${<resource>.<output>}` inside
//! strings. A string that is exactly one reference resolves to the
//! referenced value with its JSON type intact; any other string containing
//! references is a template and always resolves to a string.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Matches `${resource.output}`.
static REFERENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z][A-Za-z0-9_-]*)\.([A-Za-z][A-Za-z0-9_]*)\}")
        .unwrap_or_else(|_| unreachable!("reference pattern is a valid regex"))
});

/// A pointer into another resource's outputs.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reference {
    /// Logical id of the referenced resource.
    pub resource: String,
    /// Output name on that resource.
    pub output: String,
}

/// One piece of a template string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplatePart {
    /// Literal text.
    Text(String),
    /// Embedded reference.
    Reference(Reference),
}

/// A declared property value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum PropertyValue {
    /// A value with no references.
    Literal(Value),
    /// Exactly one reference.
    Reference(Reference),
    /// A string with embedded references.
    Template(Vec<TemplatePart>),
    /// A list containing at least one reference.
    List(Vec<PropertyValue>),
    /// A map containing at least one reference.
    Map(BTreeMap<String, PropertyValue>),
}

impl Reference {
    /// Creates a reference.
    #[must_use]
    pub fn new(resource: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            output: output.into(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.output)
    }
}

impl PropertyValue {
    /// Parses a raw value, recognising references in strings.
    #[must_use]
    pub fn parse(raw: &Value) -> Self {
        match raw {
            Value::String(s) => Self::parse_string(s),
            Value::Array(items) => {
                let parsed: Vec<Self> = items.iter().map(Self::parse).collect();
                if parsed.iter().all(Self::is_literal) {
                    Self::Literal(raw.clone())
                } else {
                    Self::List(parsed)
                }
            }
            Value::Object(entries) => {
                let parsed: BTreeMap<String, Self> = entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::parse(v)))
                    .collect();
                if parsed.values().all(Self::is_literal) {
                    Self::Literal(raw.clone())
                } else {
                    Self::Map(parsed)
                }
            }
            other => Self::Literal(other.clone()),
        }
    }

    fn parse_string(s: &str) -> Self {
        let mut parts = Vec::new();
        let mut last = 0;

        for caps in REFERENCE_PATTERN.captures_iter(s) {
            let (Some(whole), Some(resource), Some(output)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            if whole.start() > last {
                parts.push(TemplatePart::Text(s[last..whole.start()].to_string()));
            }
            parts.push(TemplatePart::Reference(Reference::new(
                resource.as_str(),
                output.as_str(),
            )));
            last = whole.end();
        }

        if parts.is_empty() {
            return Self::Literal(Value::String(s.to_string()));
        }
        if last < s.len() {
            parts.push(TemplatePart::Text(s[last..].to_string()));
        }

        match parts.as_slice() {
            [TemplatePart::Reference(reference)] => Self::Reference(reference.clone()),
            _ => Self::Template(parts),
        }
    }

    /// Returns true if the value holds no references.
    #[must_use]
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }

    /// Collects every reference with the property path it appears at.
    ///
    /// `path` is the name of the property holding this value; nested
    /// positions are appended as `.key` or `[index]`.
    #[must_use]
    pub fn references(&self, path: &str) -> Vec<(String, Reference)> {
        let mut found = Vec::new();
        self.collect_references(path, &mut found);
        found
    }

    fn collect_references(&self, path: &str, found: &mut Vec<(String, Reference)>) {
        match self {
            Self::Literal(_) => {}
            Self::Reference(reference) => found.push((path.to_string(), reference.clone())),
            Self::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Reference(reference) = part {
                        found.push((path.to_string(), reference.clone()));
                    }
                }
            }
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_references(&format!("{path}[{i}]"), found);
                }
            }
            Self::Map(entries) => {
                for (key, item) in entries {
                    item.collect_references(&format!("{path}.{key}"), found);
                }
            }
        }
    }

    /// Resolves the value using `lookup` for each reference.
    ///
    /// Returns `None` if any reference has no known value.
    pub fn resolve<F>(&self, lookup: &F) -> Option<Value>
    where
        F: Fn(&Reference) -> Option<Value>,
    {
        match self {
            Self::Literal(value) => Some(value.clone()),
            Self::Reference(reference) => lookup(reference),
            Self::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => out.push_str(text),
                        TemplatePart::Reference(reference) => match lookup(reference)? {
                            Value::String(s) => out.push_str(&s),
                            other => out.push_str(&other.to_string()),
                        },
                    }
                }
                Some(Value::String(out))
            }
            Self::List(items) => items
                .iter()
                .map(|item| item.resolve(lookup))
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            Self::Map(entries) => entries
                .iter()
                .map(|(k, v)| v.resolve(lookup).map(|resolved| (k.clone(), resolved)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(Value::Object),
        }
    }

    /// Converts back to the raw stack-file form.
    #[must_use]
    pub fn to_raw(&self) -> Value {
        match self {
            Self::Literal(value) => value.clone(),
            Self::Reference(reference) => Value::String(reference.to_string()),
            Self::Template(parts) => {
                let text: String = parts
                    .iter()
                    .map(|part| match part {
                        TemplatePart::Text(text) => text.clone(),
                        TemplatePart::Reference(reference) => reference.to_string(),
                    })
                    .collect();
                Value::String(text)
            }
            Self::List(items) => Value::Array(items.iter().map(Self::to_raw).collect()),
            Self::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_raw()))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(raw: Value) -> Self {
        Self::parse(&raw)
    }
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        value.to_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn lookup(reference: &Reference) -> Option<Value> {
        match (reference.resource.as_str(), reference.output.as_str()) {
            ("bucket", "bucket_name") => Some(json!("site-bucket")),
            ("zone", "ttl") => Some(json!(300)),
            _ => None,
        }
    }

    #[test]
    fn test_plain_string_is_literal() {
        let value = PropertyValue::parse(&json!("index.html"));
        assert_eq!(value, PropertyValue::Literal(json!("index.html")));
        assert!(value.references("default_root_object").is_empty());
    }

    #[test]
    fn test_whole_reference_keeps_type() {
        let value = PropertyValue::parse(&json!("${zone.ttl}"));
        assert_eq!(value, PropertyValue::Reference(Reference::new("zone", "ttl")));
        assert_eq!(value.resolve(&lookup), Some(json!(300)));
    }

    #[test]
    fn test_template_resolves_to_string() {
        let value = PropertyValue::parse(&json!("s3://${bucket.bucket_name}/"));
        assert!(matches!(value, PropertyValue::Template(_)));
        assert_eq!(value.resolve(&lookup), Some(json!("s3://site-bucket/")));
    }

    #[test]
    fn test_unknown_reference_yields_none() {
        let value = PropertyValue::parse(&json!(["a", "${cert.arn}"]));
        assert_eq!(value.resolve(&lookup), None);
    }

    #[test]
    fn test_nested_reference_paths() {
        let value = PropertyValue::parse(&json!({
            "target": { "dns": "${cdn.domain_name}" },
            "aliases": ["www", "${zone.domain_name}"]
        }));
        let refs = value.references("alias");
        assert_eq!(
            refs,
            vec![
                (String::from("alias.aliases[1]"), Reference::new("zone", "domain_name")),
                (String::from("alias.target.dns"), Reference::new("cdn", "domain_name")),
            ]
        );
    }

    #[test]
    fn test_raw_form_is_preserved() {
        let raw = json!({ "origin": "${bucket.regional_domain_name}", "port": 443 });
        assert_eq!(PropertyValue::parse(&raw).to_raw(), raw);
    }
}
