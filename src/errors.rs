//! Error utilities

/// Message returned to the user when the residency check fails
pub const RESIDENCY_VIOLATION: &str = "resource cannot be deployed outside of EU";

/// Reasons an admission request is not let through unchanged.
///
/// A resource of an unexpected kind is not an error: the pipeline allows
/// it without mutation.
#[derive(thiserror::Error, Debug)]
pub enum AdmitError {
    /// Embedded object is missing or does not conform to the Pod schema
    #[error("could not deserialize pod object: {0}")]
    Decode(String),
    /// Residency policy rejected the workload
    #[error("{0}")]
    PolicyViolation(&'static str),
    /// Cluster API call failed
    #[error("cluster api call failed: {0}")]
    Collaborator(#[source] kube::Error),
    /// Bug in the webhook itself, e.g. a patch that would not apply
    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}

impl AdmitError {
    /// HTTP-like status code reported in the denial
    pub fn code(&self) -> u16 {
        match self {
            AdmitError::Decode(_) => 400,
            AdmitError::PolicyViolation(_) => 403,
            AdmitError::Collaborator(_) | AdmitError::Internal(_) => 500,
        }
    }

    /// True if the message can be shown to the requester as is
    pub fn is_user_facing(&self) -> bool {
        self.code() < 500
    }
}
