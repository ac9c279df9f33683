//! WebSocket Client Endpoint
//!
//! `GET /ws?id=<clientID>` attaches one client to this node's hub. Each
//! connection runs a write pump (outbound queue and keepalive pings) and a
//! read pump (inbound frames routed through the hub). Either side ending
//! tears down both and unregisters the connection.

use super::state::AppState;
use crate::hub::{ConnectionHandle, ConnectionId, HubConfig, Register, RouteMessage, Unregister};
use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use futures::{stream::SplitSink, stream::SplitStream, SinkExt, StreamExt};
use relaymesh_core::{validate_client_id, ClientId, ClientIdError, Message};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    pub id: Option<String>,
}

/// Validate the client id, then upgrade.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let client_id = match parse_client_id(params.id) {
        Ok(id) => id,
        Err(e) => {
            debug!(error = %e, "Rejecting connection with bad client id");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };

    match upgrade {
        Ok(ws) => ws
            .max_message_size(state.hub_config.max_message_bytes)
            .on_upgrade(move |socket| serve_connection(socket, state, client_id)),
        Err(rejection) => rejection.into_response(),
    }
}

fn parse_client_id(id: Option<String>) -> Result<ClientId, ClientIdError> {
    let id = id.unwrap_or_default();
    validate_client_id(&id)?;
    Ok(id)
}

async fn serve_connection(socket: WebSocket, state: AppState, client_id: ClientId) {
    let config = state.hub_config.clone();
    let (handle, queue) = ConnectionHandle::channel(client_id.clone(), config.outbound_queue_capacity);
    let connection = handle.id;

    match state.hub.ask(Register { handle }).await {
        Ok(ack) => info!(
            client_id = %client_id,
            connection = %connection,
            flushed = ack.flushed,
            replaced = ack.replaced,
            "WebSocket client attached"
        ),
        Err(e) => {
            warn!(client_id = %client_id, error = %e, "Hub rejected registration");
            return;
        }
    }

    let (sink, stream) = socket.split();
    let done = CancellationToken::new();
    let writer = tokio::spawn(write_pump(sink, queue, config.clone(), done.clone()));

    read_pump(stream, &state, &client_id, connection, &config, &done).await;

    done.cancel();
    let unregister = Unregister {
        client_id: client_id.clone(),
        connection,
    };
    if let Err(e) = state.hub.tell(unregister).await {
        warn!(client_id = %client_id, error = %e, "Failed to unregister connection");
    }
    let _ = writer.await;
    debug!(client_id = %client_id, connection = %connection, "WebSocket client detached");
}

async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    client_id: &str,
    connection: ConnectionId,
    config: &HubConfig,
    done: &CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = done.cancelled() => break,
            frame = tokio::time::timeout(config.ws_pong_wait, stream.next()) => frame,
        };

        let frame = match frame {
            Err(_) => {
                debug!(client_id = %client_id, connection = %connection, "Client silent past pong wait");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!(client_id = %client_id, error = %e, "WebSocket read failed");
                break;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        let bytes = match &frame {
            WsMessage::Text(text) => text.as_str().as_bytes(),
            WsMessage::Binary(bytes) => bytes.as_ref(),
            WsMessage::Close(_) => break,
            // Pings are answered by the socket; any frame counts as liveness
            WsMessage::Ping(_) | WsMessage::Pong(_) => continue,
        };

        let mut message = match Message::from_json(bytes, config.max_message_bytes) {
            Ok(message) => message,
            Err(e) => {
                debug!(client_id = %client_id, error = %e, "Dropping malformed client frame");
                continue;
            }
        };
        message.from = client_id.to_string();
        trace!(client_id = %client_id, recipients = message.to.len(), "Client message received");

        if let Err(e) = state.hub.tell(RouteMessage { message }).await {
            warn!(client_id = %client_id, error = %e, "Hub rejected client message");
            break;
        }
    }
}

async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut queue: mpsc::Receiver<Message>,
    config: HubConfig,
    done: CancellationToken,
) {
    let mut ping = tokio::time::interval(config.ws_ping_interval);
    ping.tick().await; // Skip first immediate tick

    loop {
        let frame = tokio::select! {
            _ = done.cancelled() => break,
            _ = ping.tick() => WsMessage::Ping(Default::default()),
            message = queue.recv() => match message {
                Some(message) => match message.to_json() {
                    Ok(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => WsMessage::Text(text.into()),
                        Err(e) => {
                            warn!(error = %e, "Encoded message is not UTF-8");
                            continue;
                        }
                    },
                    Err(e) => {
                        warn!(error = %e, "Failed to encode message for client");
                        continue;
                    }
                },
                // Evicted or replaced by a newer connection
                None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                }
            },
        };

        match tokio::time::timeout(config.ws_write_timeout, sink.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(error = %e, "WebSocket write failed");
                break;
            }
            Err(_) => {
                debug!("WebSocket write timed out");
                break;
            }
        }
    }
    done.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_id() {
        assert_eq!(parse_client_id(Some("alice".into())).unwrap(), "alice");
        assert!(matches!(parse_client_id(None), Err(ClientIdError::Empty)));
        assert!(matches!(
            parse_client_id(Some(String::new())),
            Err(ClientIdError::Empty)
        ));
    }
}
