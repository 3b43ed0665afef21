//! Request handlers.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use super::models::StreamUrlReply;
use super::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/stream-url", get(stream_url))
        .route("/health", get(health))
}

#[derive(Debug, Deserialize)]
struct StreamUrlQuery {
    #[serde(default)]
    roomid: String,
}

async fn stream_url(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StreamUrlQuery>,
) -> (StatusCode, Json<StreamUrlReply>) {
    let expected = &state.config.token;
    if !expected.is_empty() {
        let provided = headers
            .get("token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected {
            warn!("rejected request with missing or invalid token");
            return (
                StatusCode::UNAUTHORIZED,
                Json(StreamUrlReply::unauthorized()),
            );
        }
    }

    let roomid = query.roomid.trim();
    if roomid.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(StreamUrlReply::bad_request("roomid is required")),
        );
    }

    let (cookie, source) = match state.cookies.resolve().await {
        Ok(resolved) => resolved,
        Err(e) => {
            error!(error = %e, "cookie resolution failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StreamUrlReply::failure(&e)),
            );
        }
    };
    info!(source = %source, "cookie resolved");

    match state.engine.select(roomid, &cookie).await {
        Ok(Some(selection)) => (StatusCode::OK, Json(StreamUrlReply::ok(selection))),
        Ok(None) => (StatusCode::OK, Json(StreamUrlReply::no_candidate())),
        Err(e) => {
            error!(room_id = %roomid, error = %e, "selection failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(StreamUrlReply::failure(&e.into())),
            )
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}
