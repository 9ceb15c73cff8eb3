//! Policy configuration.
//!
//! Everything the admission pipeline treats as policy lives here and is
//! handed to the evaluator and reconciler when they are constructed.
//! Missing fields fall back to the canonical policy, so an empty file is a
//! valid configuration.

use crate::{
    locations::DEFAULT_LOCATION_LABELS,
    policy::{PolicyEvaluator, ResidencyRule},
    tags::TagReconciler,
};
use anyhow::Context as _;
use serde::Deserialize;
use std::path::Path;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct PolicyConfig {
    pub residency: ResidencyConfig,
    pub transparency: TransparencyConfig,
    /// Node labels that carry location identifiers, read in this order
    pub location_labels: LocationLabels,
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct ResidencyConfig {
    /// Pod label that opts into the residency check
    pub label: String,
    /// Label value that turns the check on
    pub constrained_value: String,
    pub allowed_prefixes: Vec<String>,
    pub denied_prefixes: Vec<String>,
    pub rule: ResidencyRule,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        ResidencyConfig {
            label: "deployOutsideOfEU".to_string(),
            constrained_value: "false".to_string(),
            allowed_prefixes: vec!["europe".to_string()],
            denied_prefixes: vec!["europe-west2".to_string()],
            rule: ResidencyRule::All,
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct TransparencyConfig {
    /// Recognized annotation keys
    pub tags: Vec<String>,
    /// Value written for tags the pod does not specify
    pub unspecified: String,
}

impl Default for TransparencyConfig {
    fn default() -> Self {
        TransparencyConfig {
            tags: vec![
                "purposes".to_string(),
                "legitimateInterest".to_string(),
                "legalBasis".to_string(),
            ],
            unspecified: crate::tags::UNSPECIFIED.to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(transparent)]
pub struct LocationLabels(pub Vec<String>);

impl Default for LocationLabels {
    fn default() -> Self {
        LocationLabels(
            DEFAULT_LOCATION_LABELS
                .iter()
                .map(ToString::to_string)
                .collect(),
        )
    }
}

impl PolicyConfig {
    /// Parses YAML policy document
    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        // an empty document deserializes to unit, not to an empty map
        if text.trim().is_empty() {
            return Ok(PolicyConfig::default());
        }
        let config: PolicyConfig =
            serde_yaml::from_str(text).context("policy document is malformed")?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses policy file
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("invalid policy file {}", path.display()))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.transparency.unspecified.is_empty() {
            anyhow::bail!("transparency.unspecified must not be empty");
        }
        if self.transparency.tags.iter().any(String::is_empty) {
            anyhow::bail!("transparency.tags must not contain empty names");
        }
        if self.residency.label.is_empty() {
            anyhow::bail!("residency.label must not be empty");
        }
        if self.residency.allowed_prefixes.is_empty() {
            anyhow::bail!("residency.allowedPrefixes must list at least one prefix");
        }
        Ok(())
    }

    pub fn evaluator(&self) -> PolicyEvaluator {
        PolicyEvaluator::new(&self.residency)
    }

    pub fn reconciler(&self) -> TagReconciler {
        TagReconciler::new(&self.transparency)
    }
}
