//! Data residency check

use crate::{
    config::ResidencyConfig,
    errors::{AdmitError, RESIDENCY_VIOLATION},
    locations::LocationSet,
};
use std::collections::BTreeMap;

/// Which node locations must carry an allowed prefix
#[derive(
    serde::Deserialize,
    strum::EnumString,
    strum::Display,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResidencyRule {
    /// Every known location
    All,
    /// Only the first enumerated location (zone of the first node)
    First,
}

/// Decides whether a pod may be deployed given the cluster's node locations.
#[derive(Debug, Clone)]
pub struct PolicyEvaluator {
    label: String,
    constrained_value: String,
    allowed_prefixes: Vec<String>,
    denied_prefixes: Vec<String>,
    rule: ResidencyRule,
}

impl PolicyEvaluator {
    pub fn new(config: &ResidencyConfig) -> Self {
        PolicyEvaluator {
            label: config.label.clone(),
            constrained_value: config.constrained_value.clone(),
            allowed_prefixes: config.allowed_prefixes.clone(),
            denied_prefixes: config.denied_prefixes.clone(),
            rule: config.rule,
        }
    }

    /// Returns true if pod labels request the residency check
    pub fn is_constrained(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        labels
            .and_then(|labels| labels.get(&self.label))
            .map_or(false, |value| *value == self.constrained_value)
    }

    fn is_allowed(&self, location: &str) -> bool {
        self.allowed_prefixes
            .iter()
            .any(|prefix| location.starts_with(prefix.as_str()))
    }

    fn is_denied(&self, location: &str) -> bool {
        self.denied_prefixes
            .iter()
            .any(|prefix| location.starts_with(prefix.as_str()))
    }

    /// # Errors
    /// Returns `AdmitError::PolicyViolation` if the pod is constrained and
    /// the cluster has (or may have) nodes outside the allowed region.
    pub fn evaluate(
        &self,
        labels: Option<&BTreeMap<String, String>>,
        locations: &LocationSet,
    ) -> Result<(), AdmitError> {
        if !self.is_constrained(labels) {
            return Ok(());
        }
        let checked: &[String] = match self.rule {
            ResidencyRule::All => locations.as_slice(),
            ResidencyRule::First => &locations.as_slice()[..locations.len().min(1)],
        };
        // nothing to check against means we cannot prove residency
        if checked.is_empty() {
            tracing::warn!("no node locations known, denying constrained pod");
            return Err(AdmitError::PolicyViolation(RESIDENCY_VIOLATION));
        }
        if let Some(outside) = checked.iter().find(|loc| !self.is_allowed(loc)) {
            tracing::info!(
                location = outside.as_str(),
                rule = %self.rule,
                "location outside allowed region"
            );
            return Err(AdmitError::PolicyViolation(RESIDENCY_VIOLATION));
        }
        if let Some(denied) = locations.iter().find(|loc| self.is_denied(loc)) {
            tracing::info!(location = denied, "location in denied sub-region");
            return Err(AdmitError::PolicyViolation(RESIDENCY_VIOLATION));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(value: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert("deployOutsideOfEU".to_string(), value.to_string());
        labels.insert("app".to_string(), "web".to_string());
        labels
    }

    fn evaluator(rule: ResidencyRule) -> PolicyEvaluator {
        PolicyEvaluator::new(&ResidencyConfig {
            rule,
            ..Default::default()
        })
    }

    fn is_violation(res: Result<(), AdmitError>) -> bool {
        matches!(res, Err(AdmitError::PolicyViolation(RESIDENCY_VIOLATION)))
    }

    #[test]
    fn unconstrained_pods_pass() {
        let eval = evaluator(ResidencyRule::All);
        let us = LocationSet::from_iter(["us-east1"]);
        assert!(eval.evaluate(None, &us).is_ok());
        assert!(eval.evaluate(Some(&BTreeMap::new()), &us).is_ok());
        assert!(eval.evaluate(Some(&labels("true")), &us).is_ok());
        assert!(eval.evaluate(Some(&labels("False")), &us).is_ok());
    }

    #[test]
    fn denies_non_eu_location() {
        let eval = evaluator(ResidencyRule::All);
        let us = LocationSet::from_iter(["us-east1"]);
        assert!(is_violation(eval.evaluate(Some(&labels("false")), &us)));
    }

    #[test]
    fn allows_eu_location() {
        let eval = evaluator(ResidencyRule::All);
        let eu = LocationSet::from_iter(["europe-west1-b", "europe-west1"]);
        assert!(eval.evaluate(Some(&labels("false")), &eu).is_ok());
    }

    #[test]
    fn denied_sub_region_wins_over_allowed_prefix() {
        let eval = evaluator(ResidencyRule::All);
        let london = LocationSet::from_iter(["europe-west1-b", "europe-west2-a"]);
        assert!(is_violation(eval.evaluate(Some(&labels("false")), &london)));
    }

    #[test]
    fn rules_differ_on_mixed_clusters() {
        let mixed = LocationSet::from_iter(["europe-west1-b", "europe-west1", "us-central1"]);
        assert!(is_violation(
            evaluator(ResidencyRule::All).evaluate(Some(&labels("false")), &mixed)
        ));
        assert!(evaluator(ResidencyRule::First)
            .evaluate(Some(&labels("false")), &mixed)
            .is_ok());
    }

    #[test]
    fn first_rule_still_scans_denied_prefixes() {
        let eval = evaluator(ResidencyRule::First);
        let mixed = LocationSet::from_iter(["europe-west1-b", "europe-west2"]);
        assert!(is_violation(eval.evaluate(Some(&labels("false")), &mixed)));
    }

    #[test]
    fn empty_location_set_fails_closed() {
        for rule in [ResidencyRule::All, ResidencyRule::First] {
            let res = evaluator(rule).evaluate(Some(&labels("false")), &LocationSet::default());
            assert!(is_violation(res));
        }
    }

    #[test]
    fn rule_names() {
        assert_eq!("first".parse::<ResidencyRule>().unwrap(), ResidencyRule::First);
        assert_eq!(ResidencyRule::All.to_string(), "all");
        assert!("some".parse::<ResidencyRule>().is_err());
    }
}
