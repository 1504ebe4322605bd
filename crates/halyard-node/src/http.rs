use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use halyard_consensus::NodeEvent;
use halyard_core::{Command, PublicKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::pool::{CommandPool, PoolError};
use crate::status::{snapshot, NodeStatus};
use crate::transport::{ConsensusEnvelope, CONSENSUS_PATH};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unknown validator: {0}")]
    UnknownValidator(PublicKey),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Consensus is not running")]
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnknownValidator(_) => StatusCode::FORBIDDEN,
            ApiError::Pool(PoolError::PoolFull) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Pool(_) => StatusCode::BAD_REQUEST,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = json!({
            "error": self.to_string()
        });
        (status, Json(body)).into_response()
    }
}

/// Application state shared with handlers
pub struct AppState {
    pub events: mpsc::UnboundedSender<NodeEvent>,
    pub pool: Arc<CommandPool>,
    pub status: Arc<Mutex<NodeStatus>>,
    /// Keys allowed to post consensus messages
    pub validators: HashSet<PublicKey>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitCommandRequest {
    pub payload: String,
    /// Payload is hex encoded
    #[serde(default)]
    pub hex: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitCommandResponse {
    pub hash: String,
    pub status: String,
}

/// Create the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(CONSENSUS_PATH, post(receive_message))
        .route("/commands", post(submit_command))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// POST /consensus - bincode `ConsensusEnvelope` from a peer
async fn receive_message(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let envelope = ConsensusEnvelope::from_bytes(&body)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if !state.validators.contains(&envelope.from) {
        return Err(ApiError::UnknownValidator(envelope.from));
    }
    debug!("Received {} from {}", envelope.message.kind(), envelope.from);
    state
        .events
        .send(NodeEvent::Message {
            from: envelope.from,
            message: envelope.message,
        })
        .map_err(|_| ApiError::Unavailable)?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /commands - queue a command for ordering
async fn submit_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitCommandRequest>,
) -> Result<Json<SubmitCommandResponse>, ApiError> {
    let payload = if request.hex {
        hex::decode(&request.payload).map_err(|e| ApiError::BadRequest(e.to_string()))?
    } else {
        request.payload.into_bytes()
    };
    let hash = state.pool.add(Command::new(payload))?;
    info!("Command {} queued", hash.short());
    Ok(Json(SubmitCommandResponse {
        hash: hash.to_hex(),
        status: "pending".to_string(),
    }))
}

/// GET /status
async fn get_status(State(state): State<Arc<AppState>>) -> Json<NodeStatus> {
    Json(snapshot(&state.status, &state.pool))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use halyard_core::{ConsensusMessage, GetEpochRequest, KeyPair};
    use tower::ServiceExt;

    fn app() -> (Router, mpsc::UnboundedReceiver<NodeEvent>, Arc<AppState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AppState {
            events: tx,
            pool: Arc::new(CommandPool::new(2)),
            status: Arc::new(Mutex::new(NodeStatus::default())),
            validators: [KeyPair::from_seed(1).public].into_iter().collect(),
        });
        (create_router(state.clone()), rx, state)
    }

    fn envelope_from(seed: u64) -> Vec<u8> {
        ConsensusEnvelope {
            from: KeyPair::from_seed(seed).public,
            message: ConsensusMessage::GetEpochRequest(GetEpochRequest { epoch: 2 }),
        }
        .to_bytes()
        .unwrap()
    }

    fn post_bytes(uri: &str, body: Vec<u8>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/octet-stream")
            .body(Body::from(body))
            .unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_consensus_message_reaches_event_loop() {
        let (router, mut rx, _) = app();
        let response = router
            .oneshot(post_bytes("/consensus", envelope_from(1)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        match rx.try_recv() {
            Ok(NodeEvent::Message { from, .. }) => assert_eq!(from, KeyPair::from_seed(1).public),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_sender_and_garbage_are_rejected() {
        let (router, mut rx, _) = app();
        let response = router
            .clone()
            .oneshot(post_bytes("/consensus", envelope_from(9)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = router
            .oneshot(post_bytes("/consensus", vec![0xde, 0xad]))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_submitted_commands_land_in_pool() {
        let (router, _rx, state) = app();
        let response = router
            .clone()
            .oneshot(post_json("/commands", json!({ "payload": "set x 1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let submitted: SubmitCommandResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(submitted.hash, Command::new(b"set x 1".to_vec()).hash().to_hex());

        let response = router
            .clone()
            .oneshot(post_json("/commands", json!({ "payload": "set x 1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(post_json("/commands", json!({ "payload": "zz", "hex": true })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(state.pool.len(), 1);
    }

    #[tokio::test]
    async fn test_status_reports_pool_size() {
        let (router, _rx, state) = app();
        state.pool.add(Command::new(b"a".to_vec())).unwrap();
        state.status.lock().unwrap().view = 12;

        let response = router
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(status["view"], 12);
        assert_eq!(status["pending_commands"], 1);
    }
}
