//! Web - HTTP producer
//!
//! `POST /message` persists one message, `GET /message` reports how many
//! are still waiting for delivery.

use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use serde::{Deserialize, Serialize};
use tower_http::normalize_path::NormalizePath;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use courier_core::observability::StoreStatus;
use courier_core::{Store, StoreError};

/// Body of `POST /message`. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IssueMessage {
    pub channel: String,
    pub message: String,
}

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn Store>,
}

/// The router behind path normalization: `/message/` and `//message` both
/// reach `/message`. Normalizing has to wrap the router, since layers added
/// with `Router::layer` only run after routing.
pub type App = NormalizePath<Router>;

pub fn app(store: Arc<dyn Store>) -> App {
    NormalizePath::trim_trailing_slash(router(store))
}

pub fn router(store: Arc<dyn Store>) -> Router {
    Router::new()
        .route("/message", get(count_messages).post(store_message))
        .fallback(invalid_resource)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { store })
}

async fn count_messages(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let status = StoreStatus::of(state.store.as_ref());

    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == "application/json");

    if wants_json {
        Json(status).into_response()
    } else {
        format!("Local message count: {}", status.message_count).into_response()
    }
}

async fn store_message(State(state): State<AppState>, body: Bytes) -> Response {
    let msg: IssueMessage = match serde_json::from_slice(&body) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(error = %e, "failed to parse the request");
            return (StatusCode::BAD_REQUEST, "Invalid data").into_response();
        }
    };

    // canonical form: only the known fields, fixed order
    let data = match serde_json::to_vec(&msg) {
        Ok(data) => data,
        Err(e) => {
            error!(error = %e, "failed to encode the message");
            return failed_to_store();
        }
    };

    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.store(&data)).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(StoreError::DuplicateStore)) => {
            // already persisted; it will be delivered once
            debug!(channel = %msg.channel, "duplicate message");
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(Err(e)) => {
            warn!(error = %e, channel = %msg.channel, "failed to store the message");
            failed_to_store()
        }
        Err(e) => {
            error!(error = %e, "store task failed");
            failed_to_store()
        }
    }
}

async fn invalid_resource() -> Response {
    (StatusCode::NOT_FOUND, "Invalid resource").into_response()
}

fn failed_to_store() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "Failed to store the message").into_response()
}
