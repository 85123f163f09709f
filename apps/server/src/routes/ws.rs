//! Authenticated push channel. Each user has at most one live socket; a new
//! connection closes and replaces the previous one.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Response {
    // Browsers cannot set headers on a websocket handshake, so the token rides
    // in the query string.
    let Some(token) = query.token.filter(|t| !t.trim().is_empty()) else {
        return ApiError::InvalidToken.into_response();
    };
    let user = match state.identity.verify(&token) {
        Ok(user) => user,
        Err(err) => return err.into_response(),
    };
    let Some(ws) = ws else {
        return (StatusCode::UPGRADE_REQUIRED, "Expected a websocket upgrade").into_response();
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, user.id))
}

async fn handle_socket(socket: WebSocket, state: AppState, user_id: Uuid) {
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    if let Some(previous) = state.register_peer(user_id, tx.clone()) {
        let _ = previous.send(Message::Close(None));
        tracing::debug!(component = "realtime", %user_id, "replaced older connection");
    }
    tracing::info!(component = "realtime", %user_id, "client connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                let Some(msg) = outbound else { break };
                let closing = matches!(msg, Message::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // clients have nothing to say on this channel
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.unregister_peer(user_id, &tx);
    tracing::info!(component = "realtime", %user_id, "client disconnected");
}
