//! Admission pipeline: decode, check residency, reconcile tags, build patch

use crate::{
    config::PolicyConfig,
    errors::AdmitError,
    locations::LocationSet,
    patch::{ObjectShape, PatchBuilder, PatchDocument},
    policy::PolicyEvaluator,
    tags::TagReconciler,
    webhook::apis::{self, GroupVersionResource},
};
use k8s_openapi::api::core::v1::Pod;
use serde_json::value::RawValue;
use std::collections::BTreeMap;

/// Resource this webhook acts on
pub fn pod_resource() -> GroupVersionResource {
    GroupVersionResource {
        group: String::new(),
        version: "v1".to_string(),
        resource: "pods".to_string(),
    }
}

/// Admission request, as seen by the pipeline
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    uid: String,
    resource: GroupVersionResource,
    operation: Option<String>,
    namespace: Option<String>,
    name: Option<String>,
    object: Option<Box<RawValue>>,
}

impl AdmissionRequest {
    pub fn new(uid: &str, resource: GroupVersionResource, object: Option<Box<RawValue>>) -> Self {
        AdmissionRequest {
            uid: uid.to_string(),
            resource,
            operation: None,
            namespace: None,
            name: None,
            object,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn resource(&self) -> &GroupVersionResource {
        &self.resource
    }

    /// Raw bytes of the embedded object
    pub fn raw_object(&self) -> Option<&[u8]> {
        self.object.as_deref().map(|raw| raw.get().as_bytes())
    }
}

impl From<apis::Request> for AdmissionRequest {
    fn from(request: apis::Request) -> Self {
        AdmissionRequest {
            uid: request.uid,
            resource: request.resource,
            operation: request.operation,
            namespace: request.namespace,
            name: request.name,
            object: request.object,
        }
    }
}

/// Pod fields the pipeline looks at
#[derive(Debug, Clone)]
pub struct PodView {
    pub labels: Option<BTreeMap<String, String>>,
    pub annotations: Option<BTreeMap<String, String>>,
    /// Object as received, for dry-running the patch
    pub document: serde_json::Value,
    pub shape: ObjectShape,
}

/// Decodes raw object bytes as a Pod.
///
/// # Errors
/// Returns `AdmitError::Decode` if the bytes are not a Pod.
pub fn decode_pod(raw: &[u8]) -> Result<PodView, AdmitError> {
    let document: serde_json::Value =
        serde_json::from_slice(raw).map_err(|err| AdmitError::Decode(err.to_string()))?;
    if !document.is_object() {
        return Err(AdmitError::Decode("object is not a JSON map".to_string()));
    }
    let pod: Pod = serde_json::from_value(document.clone())
        .map_err(|err| AdmitError::Decode(err.to_string()))?;
    let shape = ObjectShape::of(&document);
    Ok(PodView {
        labels: pod.metadata.labels,
        annotations: pod.metadata.annotations,
        document,
        shape,
    })
}

/// The mutation policy, bound to the node locations discovered at startup.
/// Immutable; share it between request handlers behind an `Arc`.
pub struct Admitter {
    evaluator: PolicyEvaluator,
    reconciler: TagReconciler,
    locations: LocationSet,
}

impl Admitter {
    pub fn new(
        evaluator: PolicyEvaluator,
        reconciler: TagReconciler,
        locations: LocationSet,
    ) -> Self {
        Admitter {
            evaluator,
            reconciler,
            locations,
        }
    }

    pub fn from_config(config: &PolicyConfig, locations: LocationSet) -> Self {
        Self::new(config.evaluator(), config.reconciler(), locations)
    }

    pub fn locations(&self) -> &LocationSet {
        &self.locations
    }

    /// Decides on a single request.
    ///
    /// `Ok(None)` lets the request through unchanged, `Ok(Some(_))` lets it
    /// through with the returned patch applied.
    ///
    /// # Errors
    /// Any error means the request must be denied.
    #[tracing::instrument(
        skip(self, req),
        fields(
            uid = req.uid.as_str(),
            name = ?req.name,
            namespace = ?req.namespace,
            operation = ?req.operation,
        )
    )]
    pub fn admit(&self, req: &AdmissionRequest) -> Result<Option<PatchDocument>, AdmitError> {
        if req.resource != pod_resource() {
            tracing::warn!(
                expected = %pod_resource(),
                actual = %req.resource,
                "unexpected resource, letting it through"
            );
            return Ok(None);
        }

        let raw = req
            .raw_object()
            .ok_or_else(|| AdmitError::Decode("request carries no object".to_string()))?;
        let pod = decode_pod(raw)?;

        self.evaluator.evaluate(pod.labels.as_ref(), &self.locations)?;

        let annotations = self.reconciler.reconcile(pod.annotations.as_ref());
        let mut builder = PatchBuilder::new(pod.shape);
        builder.annotations(&annotations);
        let patch = builder.build();

        let mut dry_run = pod.document;
        patch.apply_to(&mut dry_run).map_err(AdmitError::Internal)?;

        tracing::debug!(operations = patch.operations().len(), "built patch");
        Ok(Some(patch))
    }
}
