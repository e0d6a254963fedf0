use anyhow::{Context, Result};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use hydration_protocol::Message;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::db::{AlertEvent, DailyTotal, Db, DeviceConfig, DrinkEvent};
use crate::mqtt::Downlink;
use crate::state::SharedState;

#[derive(Clone)]
pub struct AppState {
    pub shared: SharedState,
    pub db: Db,
    pub downlink: Arc<dyn Downlink>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/devices/{id}/history", get(api_history))
        .route("/api/devices/{id}/command", post(api_command))
        .with_state(state)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        warn!("api error: {e:#}");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.message }));
        (self.status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct HistoryParams {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default = "default_days")]
    days: i64,
}

fn default_limit() -> i64 {
    50
}

fn default_days() -> i64 {
    7
}

#[derive(Serialize)]
struct HistoryResponse {
    device_id: String,
    device: Option<DeviceConfig>,
    drinks: Vec<DrinkEvent>,
    daily_totals: Vec<DailyTotal>,
    alerts: Vec<AlertEvent>,
    /// Logged drinks over the last 24 h, independent of the bottle's total.
    drunk_last_24h_ml: f64,
}

async fn api_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HistoryParams>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let device = state.db.get_device(&id).await?;
    let seen = state.shared.read().await.devices.contains_key(&id);
    if device.is_none() && !seen {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("unknown device '{id}'"),
        ));
    }

    let limit = params.limit.clamp(1, 500);
    let days = params.days.clamp(1, 366);
    let now = OffsetDateTime::now_utc().unix_timestamp();

    Ok(Json(HistoryResponse {
        drunk_last_24h_ml: state
            .db
            .drink_sum_between(&id, now - 24 * 3600, now + 1)
            .await?,
        drinks: state.db.recent_drinks(&id, limit).await?,
        daily_totals: state.db.daily_totals(&id, days).await?,
        alerts: state.db.recent_alerts(&id, limit).await?,
        device,
        device_id: id,
    }))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Body is a tagged message, e.g. `{"command": "set_rgb", "value": 3}` or
/// `{"command": "tare"}`.
async fn api_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(msg): Json<Message>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    if !msg.is_device_command() {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("{:?} is not a device command", msg.command()),
        ));
    }
    if !state.shared.read().await.devices.contains_key(&id) {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("unknown device '{id}'"),
        ));
    }

    state
        .downlink
        .send(&id, &msg)
        .map_err(|e| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, format!("{e:#}")))?;

    info!(device = %id, ?msg, "command sent");
    state
        .shared
        .write()
        .await
        .record_command(&id, format!("sent {msg:?}"));

    Ok((StatusCode::ACCEPTED, Json(msg)))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!("api listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================
