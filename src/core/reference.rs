//! LS-003: Reference placeholders.
//!
//! A placeholder `${resources.<id>.<attribute>}` (attribute optional) marks a
//! property value that is another resource's attribute. Placeholders stay
//! backend-neutral until emission rewrites them.

use super::types::Properties;
use regex::{Captures, Regex};
use serde_json::Value;
use std::fmt;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{resources\.([A-Za-z0-9_\-]+)(?:\.([A-Za-z0-9_\-\.\[\]]+))?\}")
        .expect("placeholder pattern is valid")
});

/// Points at resource `resource`, attribute `attribute`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferencePlaceholder {
    pub resource: String,
    pub attribute: Option<String>,
}

impl ReferencePlaceholder {
    pub fn new(resource: &str, attribute: Option<&str>) -> Self {
        Self {
            resource: resource.to_string(),
            attribute: attribute.map(str::to_string),
        }
    }

    /// Placeholder text for `resource.attribute`.
    pub fn attr(resource: &str, attribute: &str) -> String {
        Self::new(resource, Some(attribute)).to_string()
    }

    /// Parse a string that is exactly one placeholder.
    pub fn parse(s: &str) -> Option<Self> {
        let caps = PLACEHOLDER.captures(s)?;
        let whole = caps.get(0)?;
        if whole.start() != 0 || whole.end() != s.len() {
            return None;
        }
        Some(from_captures(&caps))
    }
}

impl fmt::Display for ReferencePlaceholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.attribute {
            Some(attr) => write!(f, "${{resources.{}.{}}}", self.resource, attr),
            None => write!(f, "${{resources.{}}}", self.resource),
        }
    }
}

fn from_captures(caps: &Captures<'_>) -> ReferencePlaceholder {
    ReferencePlaceholder {
        resource: caps[1].to_string(),
        attribute: caps.get(2).map(|m| m.as_str().to_string()),
    }
}

/// Whether `id` can be addressed by a placeholder.
pub fn is_addressable(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Normalize an id-or-placeholder (`x` or `${resources.x}`) to a bare id.
pub fn normalize_id(s: &str) -> String {
    match ReferencePlaceholder::parse(s.trim()) {
        Some(p) => p.resource,
        None => s.trim().to_string(),
    }
}

/// Every placeholder in a property map, with the property path it sits at.
///
/// Paths use `a.b[2].c` notation. Order follows property order.
pub fn scan(properties: &Properties) -> Vec<(String, ReferencePlaceholder)> {
    let mut found = Vec::new();
    for (key, value) in properties {
        scan_value(key, value, &mut found);
    }
    found
}

fn scan_value(path: &str, value: &Value, found: &mut Vec<(String, ReferencePlaceholder)>) {
    match value {
        Value::String(s) => {
            for caps in PLACEHOLDER.captures_iter(s) {
                found.push((path.to_string(), from_captures(&caps)));
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                scan_value(&format!("{}[{}]", path, i), item, found);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                scan_value(&format!("{}.{}", path, key), item, found);
            }
        }
        _ => {}
    }
}

/// Rewrite every placeholder in `value` using `render`.
pub fn rewrite<F>(value: &Value, render: &F) -> Value
where
    F: Fn(&ReferencePlaceholder) -> String,
{
    match value {
        Value::String(s) if s.contains("${resources.") => {
            let out = PLACEHOLDER.replace_all(s, |caps: &Captures<'_>| render(&from_captures(caps)));
            Value::String(out.into_owned())
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| rewrite(v, render)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), rewrite(v, render)))
                .collect(),
        ),
        other => other.clone(),
    }
}
