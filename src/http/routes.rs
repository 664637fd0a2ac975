//! HTTP route definitions

use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::app::AppState;
use crate::game::GameRoom;
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .route("/rooms", get(list_rooms_handler).post(create_room_handler))
        .route("/ws", get(ws_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    active_rooms: usize,
    connected_players: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        active_rooms: state.rooms.active_rooms(),
        connected_players: state.rooms.total_players(),
    })
}

// ============================================================================
// Room endpoints
// ============================================================================

#[derive(Deserialize)]
struct CreateRoomRequest {
    creator_name: String,
}

#[derive(Serialize)]
struct CreateRoomResponse {
    room_id: Uuid,
    ws_path: String,
}

async fn create_room_handler(
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, AppError> {
    let name = req.creator_name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("creator_name must not be empty".to_string()));
    }

    let room_id = Uuid::new_v4();
    let seed: u64 = rand::random();
    let (room, handle) = GameRoom::new(
        room_id,
        name,
        state.config.grid_width,
        state.config.grid_height,
        seed,
    );

    state.rooms.insert(handle);

    // The room unregisters itself once its task ends
    let rooms = state.rooms.clone();
    tokio::spawn(async move {
        room.run().await;
        rooms.remove(&room_id);
        info!(room_id = %room_id, "room removed from registry");
    });

    info!(room_id = %room_id, creator = name, "room created");

    Ok(Json(CreateRoomResponse {
        room_id,
        ws_path: format!("/ws?room={}", room_id),
    }))
}

#[derive(Serialize)]
struct RoomSummary {
    room_id: Uuid,
    connected_players: usize,
}

#[derive(Serialize)]
struct ListRoomsResponse {
    rooms: Vec<RoomSummary>,
}

async fn list_rooms_handler(State(state): State<AppState>) -> Json<ListRoomsResponse> {
    let rooms = state
        .rooms
        .handles()
        .into_iter()
        .map(|h| RoomSummary {
            room_id: h.id,
            connected_players: h.player_count(),
        })
        .collect();

    Json(ListRoomsResponse { rooms })
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_errors_map_to_http_statuses() {
        let resp = AppError::NotFound("no such room".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = AppError::BadRequest("empty name".to_string()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
