//! HTTP route definitions

use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::app::AppState;
use crate::game::map::GameMode;
use crate::game::players::PendingSession;
use crate::game::points::Statistics;
use crate::http::middleware::require_signature;
use crate::util::time::{unix_millis, uptime_secs};
use crate::ws::handler::ws_handler;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // Public routes (no signature required)
    let public_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/scoreboard", get(scoreboard_handler))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .route("/ws", get(ws_handler));

    // Session authority routes (signed body required)
    let signed_routes = Router::new()
        .route("/sessions", post(register_session_handler))
        .layer(middleware::from_fn_with_state(state.clone(), require_signature))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT));

    Router::new()
        .merge(public_routes)
        .merge(signed_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    players: usize,
    map: String,
    mode: GameMode,
    time_left: f64,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let world = &state.world;
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        players: world.tanks.len(),
        map: world.maps.current_filename(),
        mode: world.maps.current_mode(),
        time_left: world.time_left(),
    })
}

// ============================================================================
// Scoreboard endpoint
// ============================================================================

#[derive(Serialize)]
struct ScoreboardResponse {
    statistics: Vec<Statistics>,
    red_score: i32,
    blue_score: i32,
}

async fn scoreboard_handler(State(state): State<AppState>) -> Json<ScoreboardResponse> {
    let world = &state.world;
    let (red_score, blue_score) = world.scores();
    Json(ScoreboardResponse {
        statistics: world.points.compile(Some(&world.tanks)),
        red_score,
        blue_score,
    })
}

// ============================================================================
// Session registration
// ============================================================================

#[derive(Serialize)]
struct RegisterSessionResponse {
    status: &'static str,
}

async fn register_session_handler(
    State(state): State<AppState>,
    Json(session): Json<PendingSession>,
) -> Result<(StatusCode, Json<RegisterSessionResponse>), AppError> {
    if state.session_limiter.check().is_err() {
        return Err(AppError::TooManyRequests);
    }
    if session.session_key.is_empty() || session.name.is_empty() {
        return Err(AppError::BadRequest(
            "session_key and name are required".to_string(),
        ));
    }
    if state.world.data.weapon(session.weapon_id).is_err() {
        return Err(AppError::BadRequest(format!(
            "Unknown weapon id {}",
            session.weapon_id
        )));
    }

    info!(name = %session.name, weapon_id = session.weapon_id, "Pending session registered");
    state.world.sessions.add(session, unix_millis());

    Ok((
        StatusCode::CREATED,
        Json(RegisterSessionResponse { status: "pending" }),
    ))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Too many requests")]
    TooManyRequests,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests".to_string(),
            ),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
