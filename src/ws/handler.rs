//! WebSocket upgrade handler

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::AppState;
use crate::game::commands::PlayerCommand;
use crate::game::players::{join, remove_player};
use crate::game::{GameError, Tank};
use crate::notify::CLIENT_QUEUE_DEPTH;
use crate::util::rate_limit::PlayerRateLimiter;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Session key handed out by the session authority
    pub key: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, query.key, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, key: String, state: AppState) {
    let (mut ws_sink, ws_stream) = socket.split();
    let (tx, rx) = mpsc::channel(CLIENT_QUEUE_DEPTH);

    let tank = match join(&state.world, &key, tx).await {
        Ok(tank) => tank,
        Err(e) => {
            warn!(error = %e, "Join rejected");
            let code = match e {
                GameError::PermissionDenied => "permission_denied",
                GameError::ServerFull => "server_full",
                _ => "join_failed",
            };
            let _ = send_msg(&mut ws_sink, &ServerMsg::error(code, e.to_string())).await;
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
    };

    info!(tank_id = tank.id(), name = tank.name(), "New WebSocket connection");

    run_session(&state, &tank, ws_sink, ws_stream, rx).await;

    // A rejoin under the same name may already have replaced this tank
    let current = state.world.tanks.find(tank.id());
    if current.is_some_and(|current| Arc::ptr_eq(&current, &tank)) {
        remove_player(&state.world, tank.id());
    }

    info!(tank_id = tank.id(), "WebSocket connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    state: &AppState,
    tank: &Tank,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    mut outbound: mpsc::Receiver<ServerMsg>,
) {
    let tank_id = tank.id();
    let rate_limiter = PlayerRateLimiter::new();

    // Spawn writer task: notifications -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(tank_id, error = %e, "WebSocket send failed");
                break;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    // Reader loop: WebSocket -> command dispatcher
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(client_msg) => {
                        if !rate_limiter.allows(&client_msg) {
                            warn!(tank_id, "Rate limited client message");
                            continue;
                        }

                        let leaving = matches!(client_msg, ClientMsg::Leave);
                        if state
                            .commands
                            .send(PlayerCommand::new(tank_id, client_msg))
                            .await
                            .is_err()
                        {
                            debug!(tank_id, "Command channel closed");
                            break;
                        }
                        if leaving {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(tank_id, error = %e, "Failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(tank_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                tank.touch(crate::util::time::unix_millis());
            }
            Ok(Message::Close(_)) => {
                info!(tank_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(tank_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

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
