use crate::callback::CallbackPayload;
use crate::notification::Notification;
use crate::state::AppState;
use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use tracing::{debug, error, info, warn};

pub async fn readiness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

pub async fn liveness_probe() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

/// Receives a registry push webhook and reconciles before answering, so a slow
/// Docker daemon holds the sender's request open. Every outcome answers 200 with an
/// empty body; results only show up in the logs (and the optional callback).
pub async fn receive_webhook(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    let notification = match Notification::from_slice(&body) {
        Ok(notification) => notification,
        Err(e) => {
            error!("Failed to parse webhook: {:#}", e);
            return StatusCode::OK;
        }
    };

    info!("Received webhook for {}", notification);
    debug!("Push data: {}", notification.push_data);

    // act logs its own failures
    let result = state.reconciler.act(&notification).await;

    if let Some(client) = &state.callback_client {
        if notification.callback_url.is_empty() {
            warn!("Registry callback enabled but webhook carries no callback_url");
        } else {
            let payload = CallbackPayload::from_result(&result);
            if let Err(e) = client.report(&notification.callback_url, &payload).await {
                error!("Failed to report result to registry: {:#}", e);
            }
        }
    }

    StatusCode::OK
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", post(receive_webhook))
        .route("/health/live", get(liveness_probe))
        .route("/health/ready", get(readiness_probe))
        .with_state(state)
}
