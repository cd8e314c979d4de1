use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use deal_screen_core::{
    encode_sse_frame, AnalysisPipeline, AnalysisRequest, CancelSignal, ModelTier, ProgressEvent,
};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<AnalysisPipeline>,
    pub default_model: ModelTier,
    pub runs: RunLock,
    /// Fires on server shutdown so in-flight runs restore their status.
    pub shutdown: CancelSignal,
}

/// One in-flight run per submission.
#[derive(Clone, Default)]
pub struct RunLock {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunLock {
    pub fn try_acquire(&self, submission_id: &str) -> Option<RunSlot> {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !active.insert(submission_id.to_string()) {
            return None;
        }
        Some(RunSlot {
            active: Arc::clone(&self.active),
            submission_id: submission_id.to_string(),
        })
    }
}

/// Releases the submission when dropped.
pub struct RunSlot {
    active: Arc<Mutex<HashSet<String>>>,
    submission_id: String,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        let mut active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        active.remove(&self.submission_id);
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeBody {
    #[serde(default)]
    submission_id: Option<String>,
    #[serde(default)]
    model: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/analyze", post(analyze))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check() -> &'static str {
    "OK"
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

async fn analyze(
    State(state): State<AppState>,
    body: Result<Json<AnalyzeBody>, JsonRejection>,
) -> Response {
    let body = match body {
        Ok(Json(body)) => body,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "rejected analyze request body");
            return bad_request("request body must be a JSON object");
        }
    };

    let Some(submission_id) = body
        .submission_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
    else {
        return bad_request("submission_id is required");
    };

    let model = body
        .model
        .as_deref()
        .and_then(ModelTier::from_id)
        .unwrap_or(state.default_model);

    let Some(slot) = state.runs.try_acquire(&submission_id) else {
        warn!(submission_id = %submission_id, "analysis already running");
        let busy = ProgressEvent {
            message: None,
            error: Some("An analysis is already running for this submission".to_string()),
            ..ProgressEvent::message(0, "")
        };
        return event_stream(Body::from(encode_sse_frame(&busy)));
    };

    info!(submission_id = %submission_id, model = model.id(), "analysis requested");
    let request = AnalysisRequest::new(submission_id, model);
    let (handle, events) = Arc::clone(&state.pipeline).spawn(request, state.shutdown.clone());

    // The slot is held until the run has restored or completed the status,
    // not just until the client goes away.
    tokio::spawn(async move {
        let _slot = slot;
        if let Err(error) = handle.await {
            warn!(error = %error, "analysis task panicked");
        }
    });

    let frames = UnboundedReceiverStream::new(events)
        .map(|event| Ok::<_, Infallible>(encode_sse_frame(&event)));
    event_stream(Body::from_stream(frames))
}

fn event_stream(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        body,
    )
        .into_response()
}
