//! Control-plane HTTP API.
//!
//! `POST /message` pushes data to tutors (or everyone), `POST /disconnect`
//! forces a tutor's socket closed, `GET /tutors` lists local tutors.
//! Presence checks are instance-local.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::future::join_all;
use relay_core::{DISCONNECT, MESSAGE, Uid};
use relay_pubsub::Relay;
use serde_json::{Value, json};
use tracing::{debug, instrument, warn};

use crate::registry::{TutorProfile, TutorRegistry};
use crate::server::AppState;

/// Invalid or missing parameters.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";
/// Generic not-found.
pub const NOT_FOUND: &str = "NOT_FOUND";
/// Unexpected internal error.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
/// Resource temporarily unavailable.
pub const NOT_AVAILABLE: &str = "NOT_AVAILABLE";

const UIDS_INVALID: &str = "uids is invalid";
const UID_INVALID: &str = "uid is invalid";

/// Error returned by control-plane handlers.
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    /// Required parameter missing or wrong type.
    #[error("{0}")]
    InvalidParams(String),
    /// Tutor not connected to this instance.
    #[error("{0}")]
    NotFound(String),
    /// The relay could not complete the request.
    #[error("{0}")]
    Internal(String),
    /// Capacity exhausted.
    #[error("{0}")]
    Unavailable(String),
}

impl ControlError {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidParams(_) => INVALID_PARAMS,
            Self::NotFound(_) => NOT_FOUND,
            Self::Internal(_) => INTERNAL_ERROR,
            Self::Unavailable(_) => NOT_AVAILABLE,
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParams(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

fn parse_body(body: &Bytes, invalid: &str) -> Result<Value, ControlError> {
    serde_json::from_slice(body).map_err(|_| ControlError::InvalidParams(invalid.to_string()))
}

/// Extract `uids` as a list of strings. Anything else is invalid.
fn parse_uids(body: &Value) -> Result<Vec<String>, ControlError> {
    let invalid = || ControlError::InvalidParams(UIDS_INVALID.to_string());
    body.get("uids")
        .and_then(Value::as_array)
        .ok_or_else(invalid)?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}

/// Publish `data` to `raw` if it names a locally registered tutor.
async fn deliver(
    relay: &Relay,
    registry: &TutorRegistry,
    raw: String,
    data: &Value,
) -> Option<String> {
    let uid = Uid::parse(raw.as_str()).ok()?;
    if !registry.has(&uid) {
        debug!(%uid, "tutor not connected here, skipping");
        return None;
    }
    relay.publish(&uid, MESSAGE, data).await.then_some(raw)
}

/// POST /message `{uids, data}`
///
/// An empty `uids` broadcasts once and answers `[]`. Otherwise answers the
/// uids that are registered locally and whose publish was accepted.
#[instrument(skip_all)]
pub async fn post_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<String>>, ControlError> {
    let body = parse_body(&body, UIDS_INVALID)?;
    let uids = parse_uids(&body)?;
    let data = body.get("data").cloned().unwrap_or(Value::Null);

    if uids.is_empty() {
        if !state.relay.broadcast(MESSAGE, &data).await {
            warn!("broadcast publish failed");
        }
        return Ok(Json(Vec::new()));
    }

    let requested = uids.len();
    let delivered: Vec<String> = join_all(
        uids.into_iter()
            .map(|raw| deliver(&state.relay, &state.registry, raw, &data)),
    )
    .await
    .into_iter()
    .flatten()
    .collect();
    debug!(requested, delivered = delivered.len(), "message relayed");
    Ok(Json(delivered))
}

/// POST /disconnect `{uid, data}`
#[instrument(skip_all)]
pub async fn post_disconnect(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ControlError> {
    let body = parse_body(&body, UID_INVALID)?;
    let uid = body
        .get("uid")
        .and_then(Value::as_str)
        .and_then(|s| Uid::parse(s).ok())
        .ok_or_else(|| ControlError::InvalidParams(UID_INVALID.to_string()))?;
    let data = body.get("data").cloned().unwrap_or(Value::Null);

    if !state.registry.has(&uid) {
        return Err(ControlError::NotFound(format!("tutor {uid} is not connected")));
    }
    if state.relay.publish(&uid, DISCONNECT, &data).await {
        Ok(Json(json!({ "success": true })))
    } else {
        Err(ControlError::Internal(format!(
            "failed to publish disconnect for {uid}"
        )))
    }
}

/// GET /tutors
pub async fn get_tutors(State(state): State<AppState>) -> Json<Vec<TutorProfile>> {
    Json(state.registry.profiles())
}
