//! Read-only user profile: profile key → value.
//!
//! Profiles are flat JSON objects. Numbers and booleans are stored as their
//! JSON text, nested objects are flattened with `.`-joined keys, and `null`
//! or empty values are skipped.

use crate::error::FormFillError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    entries: BTreeMap<String, String>,
}

impl UserProfile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(json)?;
        let mut entries = BTreeMap::new();
        flatten("", &value, &mut entries);
        Ok(Self { entries })
    }

    /// Load a profile from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FormFillError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| FormFillError::ProfileLoadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        Self::from_json_str(&text).map_err(|e| FormFillError::ProfileLoadFailed {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for UserProfile {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let entries = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(_, v): &(String, String)| !v.trim().is_empty())
            .collect();
        Self { entries }
    }
}

fn flatten(prefix: &str, value: &Value, out: &mut BTreeMap<String, String>) {
    let text = match value {
        Value::Null => return,
        Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{prefix}.{k}")
                };
                flatten(&key, v, out);
            }
            return;
        }
        Value::Array(items) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    };
    if !prefix.is_empty() && !text.is_empty() {
        out.insert(prefix.to_string(), text);
    }
}
