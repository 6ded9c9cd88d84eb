use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::batch::classify_and_report;
use crate::server::AppState;
use crate::trigger::signature::{verify_signature, SIGNATURE_HEADER};

#[derive(Debug, Default, Deserialize)]
struct TriggerRequest {
    window_minutes: Option<u64>,
}

/// `POST /drci/update`: verify the signature and start a run in the
/// background. Answers 409 while another run is in progress.
pub async fn trigger_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        tracing::warn!("Missing X-Drci-Signature-256 header");
        return reply(StatusCode::UNAUTHORIZED, "missing signature");
    };

    if let Err(e) = verify_signature(state.config.trigger_secret(), &body, signature) {
        tracing::warn!(error = %e, "Trigger signature verification failed");
        return reply(StatusCode::UNAUTHORIZED, "invalid signature");
    }

    let request: TriggerRequest = if body.iter().all(u8::is_ascii_whitespace) {
        TriggerRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed trigger body");
                return reply(StatusCode::BAD_REQUEST, "malformed body");
            }
        }
    };
    let window_minutes = request
        .window_minutes
        .unwrap_or(state.config.drci.window_minutes);

    let Ok(guard) = state.run_lock.clone().try_lock_owned() else {
        tracing::info!("Run already in progress, rejecting trigger");
        return reply(StatusCode::CONFLICT, "run in progress");
    };

    let ctx = state.ctx.clone();
    tokio::spawn(async move {
        let _guard = guard;
        match classify_and_report(ctx, window_minutes).await {
            Ok(summary) => tracing::info!(?summary, "Triggered run complete"),
            Err(e) => tracing::error!(error = %e, "Triggered run failed"),
        }
    });

    tracing::info!(window_minutes, "Run started");
    (
        StatusCode::ACCEPTED,
        Json(json!({ "status": "accepted", "window_minutes": window_minutes })),
    )
}

fn reply(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "error": message })))
}
