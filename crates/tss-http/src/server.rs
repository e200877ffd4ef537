//! Receiving half of the HTTP transport

use crate::WireEnvelope;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;
use tss_core::{Envelope, Error, ErrorKind, TransportReceiver};

/// Routes serving `/health` and `/v1/msg` for `receiver`
///
/// The POST handler answers with the receiver's admission checks and then
/// delivers in the background, so a message held behind the readiness gate
/// outlives the request that carried it.
pub fn router<R: TransportReceiver + 'static>(receiver: Arc<R>) -> Router {
    let receiver: Arc<dyn TransportReceiver> = receiver;
    Router::new()
        .route("/health", get(health))
        .route("/v1/msg", post(post_message))
        .layer(TraceLayer::new_for_http())
        .with_state(receiver)
}

/// Health check endpoint
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tss-party",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Deliver one envelope to the receiver
async fn post_message(
    State(receiver): State<Arc<dyn TransportReceiver>>,
    body: Result<Json<WireEnvelope>, JsonRejection>,
) -> Response {
    let Json(wire) = match body {
        Ok(body) => body,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let envelope = match Envelope::try_from(wire) {
        Ok(envelope) => envelope,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("Invalid base64: {e}")),
    };

    if let Err(e) = receiver.admit(&envelope) {
        warn!(phase = %envelope.phase, from = %envelope.from, error = %e, "Inbound message refused");
        return error_response(status_for(&e), e.to_string());
    }

    let (phase, from) = (envelope.phase, envelope.from.clone());
    tokio::spawn(async move {
        if let Err(e) = receiver.on_message(envelope).await {
            warn!(phase = %phase, from = %from, error = %e, "Inbound message not delivered");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
        .into_response()
}

fn status_for(error: &Error) -> StatusCode {
    if let Error::GateClosed(_) = error {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match error.kind() {
        ErrorKind::Configuration
        | ErrorKind::ProtocolViolation
        | ErrorKind::Precondition
        | ErrorKind::Engine => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
