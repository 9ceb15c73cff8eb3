//! Transparency tags carried in pod annotations

use crate::config::TransparencyConfig;
use std::collections::BTreeMap;

/// Default value for tags the pod does not specify
pub const UNSPECIFIED: &str = "unspecified";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagValue {
    Specified(String),
    Unspecified,
}

/// Values of all recognized tags, keyed by annotation name
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransparencyTags(BTreeMap<String, TagValue>);

impl TransparencyTags {
    pub fn get(&self, name: &str) -> Option<&TagValue> {
        self.0.get(name)
    }

    pub fn set(&mut self, name: &str, value: TagValue) -> &mut Self {
        self.0.insert(name.to_string(), value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TagValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Fills recognized annotation keys with defaults.
#[derive(Debug, Clone)]
pub struct TagReconciler {
    names: Vec<String>,
    unspecified: String,
}

impl TagReconciler {
    pub fn new(config: &TransparencyConfig) -> Self {
        TagReconciler {
            names: config.tags.clone(),
            unspecified: config.unspecified.clone(),
        }
    }

    /// Recognized annotation keys
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Reads recognized tags out of annotations. Missing, empty and
    /// sentinel values all decode to `TagValue::Unspecified`.
    pub fn decode(&self, annotations: &BTreeMap<String, String>) -> TransparencyTags {
        let mut tags = TransparencyTags::default();
        for name in &self.names {
            let value = match annotations.get(name) {
                Some(v) if !v.is_empty() && *v != self.unspecified => {
                    TagValue::Specified(v.clone())
                }
                _ => TagValue::Unspecified,
            };
            tags.set(name, value);
        }
        tags
    }

    /// Renders every recognized tag as an annotation.
    /// Tags absent from `tags` are rendered as the sentinel.
    pub fn encode(&self, tags: &TransparencyTags) -> BTreeMap<String, String> {
        self.names
            .iter()
            .map(|name| {
                let value = match tags.get(name) {
                    Some(TagValue::Specified(v)) if !v.is_empty() => v.clone(),
                    _ => self.unspecified.clone(),
                };
                (name.clone(), value)
            })
            .collect()
    }

    /// Returns `annotations` with every recognized key holding a non-empty
    /// value. Keys outside the schema are kept as they are.
    pub fn reconcile(
        &self,
        annotations: Option<&BTreeMap<String, String>>,
    ) -> BTreeMap<String, String> {
        let mut reconciled = annotations.cloned().unwrap_or_default();
        let tags = self.decode(&reconciled);
        for (name, value) in self.encode(&tags) {
            let previous = reconciled.insert(name.clone(), value);
            if previous.as_deref().map_or(true, str::is_empty) {
                tracing::debug!(tag = name.as_str(), "transparency tag defaulted");
            }
        }
        reconciled
    }
}
