use crate::{errors::AdmitError, patch::PatchDocument};
use apis::{AdmissionReviewResponse, Status};
use base64::Engine as _;

pub mod apis;
pub mod server;

enum Choice {
    Allow { patch: Option<PatchDocument> },
    Reject(Status),
}

/// High-level builder for webhook decisions
pub struct Decision(Choice);

impl Decision {
    pub fn allow() -> Self {
        Decision(Choice::Allow { patch: None })
    }

    pub fn allow_with_patch(patch: PatchDocument) -> Self {
        if patch.is_empty() {
            return Decision::allow();
        }
        Decision(Choice::Allow { patch: Some(patch) })
    }

    pub fn reject_with_status(status: Status) -> Decision {
        Decision(Choice::Reject(status))
    }

    pub fn reject_with_message(code: u16, message: &str) -> Decision {
        Decision::reject_with_status(Status {
            code: Some(code),
            message: Some(message.to_string()),
        })
    }

    /// Denies the request. Internal failures are logged and reported
    /// without details.
    pub fn from_error(err: &AdmitError) -> Decision {
        if err.is_user_facing() {
            Decision::reject_with_message(err.code(), &err.to_string())
        } else {
            tracing::error!("{:#}", err);
            Decision::reject_with_message(err.code(), "Internal error")
        }
    }

    pub fn from_result(res: Result<Option<PatchDocument>, AdmitError>) -> Decision {
        match res {
            Ok(Some(patch)) => Decision::allow_with_patch(patch),
            Ok(None) => Decision::allow(),
            Err(err) => Decision::from_error(&err),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self.0, Choice::Allow { .. })
    }

    /// Encodes the decision as a response to the request `uid`
    pub fn finish(self, uid: &str) -> AdmissionReviewResponse {
        let response = match self.0 {
            Choice::Allow { patch } => {
                let patch = match patch.map(|p| p.to_bytes()).transpose() {
                    Ok(patch) => patch,
                    Err(err) => {
                        tracing::error!("failed to serialize a json patch: {}", err);
                        return Decision::reject_with_message(500, "Internal error").finish(uid);
                    }
                };
                apis::Response {
                    allowed: true,
                    uid: uid.to_string(),
                    status: None,
                    patch: patch.map(|patch| apis::Patch {
                        patch_type: apis::PatchType::JsonPatch,
                        patch: base64::engine::general_purpose::STANDARD.encode(patch),
                    }),
                }
            }
            Choice::Reject(status) => apis::Response {
                allowed: false,
                uid: uid.to_string(),
                status: if status.is_empty() {
                    None
                } else {
                    Some(status)
                },
                patch: None,
            },
        };
        AdmissionReviewResponse {
            kind: apis::Kind,
            api_version: apis::ApiVersion,
            response,
        }
    }
}
