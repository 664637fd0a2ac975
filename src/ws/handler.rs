//! WebSocket upgrade handler
//!
//! Connections attach to an existing room by id. The handler assigns a
//! session id, forwards parsed intents to the room task, and relays the
//! room's broadcast events back to the socket. A Join intent is
//! synthesized at connect and a Leave at disconnect, so the room sees a
//! complete session lifecycle even for clients that just vanish.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{PlayerIntent, RoomHandle};
use crate::http::routes::AppError;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Room to join
    pub room: Uuid,
    /// Display name; rejoining with the same name reclaims the slot
    pub name: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match state.rooms.get(&query.room) {
        Some(handle) => {
            info!(room_id = %query.room, name = %query.name, "WebSocket upgrade");
            ws.on_upgrade(move |socket| handle_socket(socket, handle, query.name))
        }
        None => {
            warn!(room_id = %query.room, "WebSocket upgrade for unknown room");
            AppError::NotFound("Room not found".to_string()).into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room: RoomHandle, name: String) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, room_id = %room.id, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        session_id,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(session_id = %session_id, error = %e, "Failed to send welcome");
        return;
    }

    // Subscribe before joining so the InitialSetup reply is not missed
    let event_rx = room.event_tx.subscribe();

    let join = PlayerIntent {
        session_id,
        msg: ClientMsg::Join { name },
        received_at: unix_millis(),
    };
    if room.intent_tx.send(join).await.is_err() {
        error!(session_id = %session_id, room_id = %room.id, "Room is gone, closing connection");
        return;
    }

    run_session(session_id, ws_sink, ws_stream, room.intent_tx.clone(), event_rx).await;

    info!(session_id = %session_id, room_id = %room.id, "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    session_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    intent_tx: mpsc::Sender<PlayerIntent>,
    mut event_rx: broadcast::Receiver<ServerMsg>,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Writer task: room events -> WebSocket
    let writer_session = session_id;
    let writer_handle = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(msg) => {
                    if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                        debug!(session_id = %writer_session, error = %e, "WebSocket send failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(
                        session_id = %writer_session,
                        lagged_count = n,
                        "Client lagged, skipping {} events", n
                    );
                    // Continue - don't disconnect for lag
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(session_id = %writer_session, "Event channel closed");
                    break;
                }
            }
        }
    });

    // Reader loop: WebSocket -> room task
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_intent() {
                    warn!(session_id = %session_id, "Rate limited intent message");
                    continue;
                }

                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        // Session identity is fixed at upgrade time
                        if matches!(msg, ClientMsg::Join { .. } | ClientMsg::Leave) {
                            warn!(session_id = %session_id, "Lifecycle message from client, ignoring");
                            continue;
                        }

                        let intent = PlayerIntent {
                            session_id,
                            msg,
                            received_at: unix_millis(),
                        };

                        if intent_tx.send(intent).await.is_err() {
                            debug!(session_id = %session_id, "Intent channel closed");
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(session_id = %session_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(session_id = %session_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(session_id = %session_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Signal disconnect to the room task
    let _ = intent_tx
        .send(PlayerIntent {
            session_id,
            msg: ClientMsg::Leave,
            received_at: unix_millis(),
        })
        .await;

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &ServerMsg,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
