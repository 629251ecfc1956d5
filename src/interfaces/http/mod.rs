//! HTTP front door for claim submission.
//!
//! ## Routes
//!
//! - `POST /pay`: validate the JSON claim request and publish it as a claim
//!   command. Answers `202` with a [`Receipt`] once the command is published.
//!   An optional `X-Correlation-Id` header is carried onto the command. Any
//!   refusal, a body that does not deserialize included, is a JSON
//!   `{ "error": .. }` document.
//! - `GET /health`: returns `{ "ok": true }`.

mod bridge;

pub use bridge::{
    AmountRequest, Bridge, CardRequest, ClaimRequest, ExpiryPart, ExpiryRequest, Receipt,
};

use crate::error::{BridgeError, ValidationError};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

pub fn router(bridge: Arc<Bridge>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/pay", post(pay_handler))
        .with_state(bridge)
}

/// Serves the bridge on `listener` until `ctx` is cancelled.
pub async fn serve(
    bridge: Arc<Bridge>,
    listener: TcpListener,
    ctx: CancellationToken,
) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http bridge listening");
    }
    axum::serve(listener, router(bridge))
        .with_graceful_shutdown(async move { ctx.cancelled().await })
        .await
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "ok": true }))
}

async fn pay_handler(
    State(bridge): State<Arc<Bridge>>,
    headers: HeaderMap,
    body: Result<Json<ClaimRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            return refuse(ValidationError::MalformedBody(rejection.body_text()).into());
        }
    };
    let correlation_id = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match bridge.submit(request, correlation_id).await {
        Ok(receipt) => (StatusCode::ACCEPTED, Json(receipt)).into_response(),
        Err(e) => refuse(e),
    }
}

fn refuse(e: BridgeError) -> Response {
    let status = match &e {
        BridgeError::Invalid(_) => StatusCode::BAD_REQUEST,
        BridgeError::Publish(_) => StatusCode::SERVICE_UNAVAILABLE,
        BridgeError::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    warn!(status = status.as_u16(), error = %e, "claim request refused");
    (status, Json(json!({ "error": e.to_string() }))).into_response()
}
