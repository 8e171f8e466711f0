//! WebSocket sessions for pilots and operators.
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::IntoResponse,
};
use guardian_core::OutboundMessage;
use serde::Deserialize;
use std::sync::Arc;

/// Handler for WebSocket connections.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<WsQuery>,
) -> axum::response::Response {
    let provided = params.token.clone().or_else(|| extract_bearer(&headers));
    let wants_operator = params.role.as_deref() == Some("operator");

    let operator = match state.config().operator_token.as_deref() {
        Some(expected) => {
            let valid = provided.as_deref() == Some(expected);
            if wants_operator && !valid {
                return StatusCode::UNAUTHORIZED.into_response();
            }
            valid
        }
        None => wants_operator,
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, operator))
        .into_response()
}

#[derive(Debug, Deserialize, Default)]
pub struct WsQuery {
    token: Option<String>,
    role: Option<String>,
}

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    let trimmed = token.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, operator: bool) {
    let mut rx = state.tx.subscribe();
    let (session_id, mut direct) = state.open_session(operator);

    // Late joiners get the published airfield straight away.
    let airfield = state.with_engine(|engine| engine.airfield().cloned());
    if let Some(airfield) = airfield {
        let greeting = OutboundMessage::AirfieldUpdate {
            airfield: Some(airfield),
        };
        if let Ok(text) = serde_json::to_string(&greeting) {
            if socket.send(Message::Text(text)).await.is_err() {
                state.close_session(&session_id);
                return;
            }
        }
    }

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => state.handle_frame(&session_id, &text),
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            outgoing = direct.recv() => {
                match outgoing {
                    Some(payload) => {
                        if socket.send(Message::Text(payload.as_ref().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            event = rx.recv() => {
                match event {
                    Ok(payload) => {
                        if socket.send(Message::Text(payload.as_ref().to_owned())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        // A newer snapshot will arrive on the next tick.
                        tracing::debug!("Session {} lagged, skipped {} broadcasts", session_id, skipped);
                        continue;
                    }
                    Err(_) => break,
                }
            }
        }
    }

    state.close_session(&session_id);
}
