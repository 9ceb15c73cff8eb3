use crate::{
    admission::{AdmissionRequest, Admitter},
    webhook::{
        apis::{AdmissionReviewRequest, AdmissionReviewResponse},
        Decision,
    },
};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{any, post},
    Json, Router,
};
use std::{sync::Arc, time::Duration};

/// Default bound on a single admission decision
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// High-level admission workflow
pub struct Server {
    admitter: Arc<Admitter>,
    deadline: Duration,
}

impl Server {
    pub fn new(admitter: Admitter) -> Self {
        Server {
            admitter: Arc::new(admitter),
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Entrypoint for mutation requests
    pub fn mutation(&self, review: AdmissionReviewRequest) -> AdmissionReviewResponse {
        let request = AdmissionRequest::from(review.request);
        let decision = Decision::from_result(self.admitter.admit(&request));
        if !decision.is_allowed() {
            tracing::info!(uid = request.uid(), "Admission request denied");
        }
        decision.finish(request.uid())
    }

    /// Same as `mutation`, but off the async executor and bounded by the
    /// configured deadline. A missed deadline denies the request.
    pub async fn mutation_with_deadline(
        self: Arc<Self>,
        review: AdmissionReviewRequest,
    ) -> AdmissionReviewResponse {
        let uid = review.request.uid.clone();
        let deadline = self.deadline;
        decide_within(deadline, &uid, move || self.mutation(review)).await
    }
}

/// Runs `decide` on the blocking pool. Denies the request `uid` if the
/// closure panics or does not return within `deadline`.
pub async fn decide_within<F>(
    deadline: Duration,
    uid: &str,
    decide: F,
) -> AdmissionReviewResponse
where
    F: FnOnce() -> AdmissionReviewResponse + Send + 'static,
{
    let task = tokio::task::spawn_blocking(decide);
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(response)) => response,
        Ok(Err(err)) => {
            tracing::error!(uid, "admission task failed: {}", err);
            Decision::reject_with_message(500, "Internal error").finish(uid)
        }
        Err(_) => {
            tracing::warn!(uid, deadline = ?deadline, "admission deadline exceeded");
            Decision::reject_with_message(500, "admission deadline exceeded").finish(uid)
        }
    }
}

/// HTTP routes: `POST /mutate` and `/health`
pub fn router(server: Arc<Server>) -> Router {
    Router::new()
        .route("/mutate", post(mutate))
        .route("/health", any(health))
        .layer(middleware::from_fn(log_request))
        .with_state(server)
}

async fn mutate(State(server): State<Arc<Server>>, body: Bytes) -> Response {
    let review: AdmissionReviewRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(err) => {
            tracing::warn!("rejecting malformed AdmissionReview: {}", err);
            return (
                StatusCode::BAD_REQUEST,
                format!("Invalid AdmissionReview: {}", err),
            )
                .into_response();
        }
    };
    Json(server.mutation_with_deadline(review).await).into_response()
}

async fn health() -> StatusCode {
    StatusCode::OK
}

async fn log_request(req: Request, next: Next) -> Response {
    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    tracing::info!(
        method = %req.method(),
        path = req.uri().path(),
        user_agent = user_agent.as_str(),
        "HTTP request"
    );
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed(uid: &str) -> AdmissionReviewResponse {
        Decision::allow().finish(uid)
    }

    #[tokio::test]
    async fn fast_decision_is_returned() {
        let res = decide_within(Duration::from_secs(5), "fast", || allowed("fast")).await;
        assert!(res.response.allowed);
        assert_eq!(res.response.uid, "fast");
    }

    #[tokio::test]
    async fn missed_deadline_denies() {
        let res = decide_within(Duration::from_millis(10), "slow", || {
            std::thread::sleep(Duration::from_millis(200));
            allowed("slow")
        })
        .await;
        assert!(!res.response.allowed);
        assert_eq!(res.response.uid, "slow");
        assert!(res.response.patch.is_none());
        let status = res.response.status.unwrap();
        assert_eq!(status.code, Some(500));
        assert_eq!(status.message.as_deref(), Some("admission deadline exceeded"));
    }

    #[tokio::test]
    async fn panicking_decision_is_internal_error() {
        let res = decide_within(Duration::from_secs(5), "boom", || -> AdmissionReviewResponse {
            panic!("reviewer bug")
        })
        .await;
        assert!(!res.response.allowed);
        assert_eq!(res.response.uid, "boom");
        let status = res.response.status.unwrap();
        assert_eq!(status.code, Some(500));
        assert_eq!(status.message.as_deref(), Some("Internal error"));
    }
}
