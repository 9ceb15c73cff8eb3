//! Node location discovery

use crate::errors::AdmitError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};

/// Well-known topology labels, read in this order for each node
pub const DEFAULT_LOCATION_LABELS: &[&str] = &[
    "topology.gke.io/zone",
    "topology.kubernetes.io/region",
    "topology.kubernetes.io/zone",
];

/// Ordered, duplicate-free list of zone and region names.
/// Order is the order in which locations were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationSet(Vec<String>);

impl LocationSet {
    /// Appends a location unless it is already known or empty.
    /// Returns true if the set changed.
    pub fn insert(&mut self, location: &str) -> bool {
        if location.is_empty() || self.contains(location) {
            return false;
        }
        self.0.push(location.to_string());
        true
    }

    pub fn contains(&self, location: &str) -> bool {
        self.0.iter().any(|known| known == location)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Collects locations from node labels
    pub fn from_nodes<'a>(nodes: impl IntoIterator<Item = &'a Node>, labels: &[String]) -> Self {
        let mut set = LocationSet::default();
        for node in nodes {
            let node_labels = match &node.metadata.labels {
                Some(l) => l,
                None => continue,
            };
            for label in labels {
                if let Some(location) = node_labels.get(label) {
                    set.insert(location);
                }
            }
        }
        set
    }
}

impl<S: AsRef<str>> FromIterator<S> for LocationSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = LocationSet::default();
        for location in iter {
            set.insert(location.as_ref());
        }
        set
    }
}

/// Source of node locations. Queried once, at startup.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    /// # Errors
    /// Returns `AdmitError::Collaborator` if the cluster can not be queried.
    async fn node_locations(&self) -> Result<LocationSet, AdmitError>;
}

/// Lists nodes through the cluster API
pub struct KubeLocationProvider {
    client: kube::Client,
    labels: Vec<String>,
}

impl KubeLocationProvider {
    pub fn new(client: kube::Client, labels: Vec<String>) -> Self {
        KubeLocationProvider { client, labels }
    }
}

#[async_trait]
impl LocationProvider for KubeLocationProvider {
    #[tracing::instrument(skip(self))]
    async fn node_locations(&self) -> Result<LocationSet, AdmitError> {
        let nodes = Api::<Node>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(AdmitError::Collaborator)?;
        let locations = LocationSet::from_nodes(&nodes.items, &self.labels);
        tracing::info!(
            nodes = nodes.items.len(),
            locations = ?locations.as_slice(),
            "Discovered node locations"
        );
        Ok(locations)
    }
}

/// Fixed list of locations, for clusters without topology labels
pub struct StaticLocations(pub LocationSet);

#[async_trait]
impl LocationProvider for StaticLocations {
    async fn node_locations(&self) -> Result<LocationSet, AdmitError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn node(labels: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn default_labels() -> Vec<String> {
        DEFAULT_LOCATION_LABELS.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn collects_in_first_seen_order() {
        let nodes = vec![
            node(&[
                ("topology.gke.io/zone", "europe-west1-b"),
                ("topology.kubernetes.io/region", "europe-west1"),
                ("topology.kubernetes.io/zone", "europe-west1-b"),
            ]),
            node(&[
                ("topology.gke.io/zone", "europe-west1-c"),
                ("topology.kubernetes.io/region", "europe-west1"),
                ("topology.kubernetes.io/zone", "europe-west1-c"),
            ]),
        ];
        let set = LocationSet::from_nodes(&nodes, &default_labels());
        assert_eq!(
            set.as_slice(),
            ["europe-west1-b", "europe-west1", "europe-west1-c"]
        );
    }

    #[test]
    fn skips_missing_and_empty_labels() {
        let nodes = vec![
            Node::default(),
            node(&[("kubernetes.io/hostname", "n1")]),
            node(&[("topology.kubernetes.io/region", "")]),
            node(&[("topology.kubernetes.io/zone", "us-east1-a")]),
        ];
        let set = LocationSet::from_nodes(&nodes, &default_labels());
        assert_eq!(set.as_slice(), ["us-east1-a"]);
    }

    #[tokio::test]
    async fn static_provider_returns_its_set() {
        let set = LocationSet::from_iter(["europe-west1"]);
        let provider = StaticLocations(set.clone());
        assert_eq!(provider.node_locations().await.unwrap(), set);
    }

    proptest! {
        #[test]
        fn never_holds_duplicates(items in proptest::collection::vec("[a-c]{0,2}", 0..20)) {
            let set = LocationSet::from_iter(&items);
            let mut seen = std::collections::HashSet::new();
            for loc in set.iter() {
                prop_assert!(!loc.is_empty());
                prop_assert!(seen.insert(loc.to_string()));
            }
            for item in items.iter().filter(|i| !i.is_empty()) {
                prop_assert!(set.contains(item));
            }
        }
    }
}
