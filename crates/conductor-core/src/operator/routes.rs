use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::BridgeError;
use crate::session::Instruction;

use super::OperatorAdapter;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    kind: Option<String>,
    message: String,
}

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            kind: None,
            message: msg.into(),
        }
    }
}

impl From<BridgeError> for AppError {
    fn from(err: BridgeError) -> Self {
        let status = match err {
            BridgeError::AlreadyPending => StatusCode::CONFLICT,
            BridgeError::SessionClosed => StatusCode::GONE,
            BridgeError::PeerDisconnected => StatusCode::SERVICE_UNAVAILABLE,
            BridgeError::TaskNotFound { .. } => StatusCode::NOT_FOUND,
        };
        Self {
            status,
            kind: Some(err.kind().to_string()),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = match self.kind {
            Some(kind) => serde_json::json!({ "error": self.message, "kind": kind }),
            None => serde_json::json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayRequest {
    pub instruction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RelayResponse {
    pub result: String,
    pub success: bool,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(adapter: OperatorAdapter) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/relay", post(relay))
        .route("/terminate", post(terminate))
        .layer(TraceLayer::new_for_http())
        .with_state(adapter)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn status(State(adapter): State<OperatorAdapter>) -> impl IntoResponse {
    Json(adapter.status())
}

async fn relay(
    State(adapter): State<OperatorAdapter>,
    body: Result<Json<RelayRequest>, JsonRejection>,
) -> Result<Json<RelayResponse>, AppError> {
    let Json(req) = body?;
    let instruction = Instruction {
        text: req.instruction,
        label: req.label,
    };
    let outcome = adapter.relay(instruction).await?;
    Ok(Json(RelayResponse {
        result: outcome.output,
        success: outcome.success,
    }))
}

async fn terminate(State(adapter): State<OperatorAdapter>) -> Result<Json<serde_json::Value>, AppError> {
    adapter.terminate()?;
    Ok(Json(serde_json::json!({})))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
