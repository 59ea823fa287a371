//! WebSocket endpoint and per-socket dispatch
//!
//! One read loop per socket: decode the tagged message, dispatch to the
//! session manager, reply through the connection's outbound queue.
//! Malformed JSON, unknown types and the protocol violations of the
//! session layer close the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Map};

use crate::api::routes::AppState;
use crate::api::ws::messages::{response_envelope, ClientMessage};
use crate::session::{ClientConnection, SessionError};

/// WebSocket upgrade handler
///
/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| client_socket(socket, state))
}

/// Drive one client socket until it closes or violates the protocol
async fn client_socket(socket: WebSocket, state: AppState) {
    let (conn, mut outbound) = state.manager.connect();
    let conn_id = conn.conn_id;
    let (mut sink, mut stream) = socket.split();

    // writer: drain the connection's outbound queue onto the socket
    let writer = tokio::spawn(async move {
        while let Some(text) = outbound.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Text(text) => {
                let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                let keep_open = match parsed {
                    Ok(message) => dispatch(&state, &conn, message).await,
                    Err(e) => {
                        tracing::warn!("Closing {}: undecodable message: {}", conn_id, e);
                        false
                    }
                };
                if !keep_open {
                    break;
                }
            }
            Message::Close(_) => break,
            // transport-level ping/pong is axum's business
            _ => {}
        }
    }

    state.manager.disconnect(conn_id).await;
    writer.abort();
    tracing::debug!("Connection {} closed", conn_id);
}

/// Reply helper: only answers requests that carried a correlation id
fn reply(
    conn: &ClientConnection,
    request_id: Option<&str>,
    ok: bool,
    message: Option<&str>,
    extra: Map<String, serde_json::Value>,
) {
    if let Some(request_id) = request_id {
        conn.send_value(&response_envelope(request_id, ok, message, extra));
    }
}

/// Reply with an error outcome; returns whether the socket stays open
fn reply_error(conn: &ClientConnection, request_id: Option<&str>, error: &SessionError) -> bool {
    if error.is_protocol_violation() {
        tracing::warn!("Closing {}: {}", conn.conn_id, error);
        return false;
    }
    if let SessionError::OwnedElsewhere { host, port, .. } = error {
        let mut extra = Map::new();
        extra.insert("redirect".to_string(), json!({"host": host, "port": port}));
        reply(conn, request_id, false, Some("handled elsewhere"), extra);
        return true;
    }
    reply(conn, request_id, false, Some(&error.to_string()), Map::new());
    true
}

/// Dispatch one decoded message; returns whether the socket stays open
async fn dispatch(state: &AppState, conn: &Arc<ClientConnection>, message: ClientMessage) -> bool {
    let manager = &state.manager;

    match message {
        ClientMessage::Ping => match manager.ping(conn) {
            Ok(pong) => {
                conn.send_message(&pong);
                true
            }
            Err(e) => {
                tracing::warn!("Closing {}: {}", conn.conn_id, e);
                false
            }
        },

        ClientMessage::RegisterUserOnGraph {
            request_id,
            graph_key,
            sheet_id,
            user_id,
            user_name,
            from_timestamp,
            token,
        } => {
            if state.auth.validate(token.as_deref()).await.is_err() {
                tracing::warn!("Closing {}: register without valid auth", conn.conn_id);
                return false;
            }
            match manager
                .register_graph(conn, &graph_key, &sheet_id, &user_id, &user_name, from_timestamp)
                .await
            {
                Ok(missing) => {
                    let mut extra = Map::new();
                    extra.insert("missingMessages".to_string(), json!(missing));
                    reply(conn, request_id.as_deref(), true, None, extra);
                    true
                }
                Err(e) => reply_error(conn, request_id.as_deref(), &e),
            }
        }

        ClientMessage::DisconnectUserOnGraph {
            request_id,
            graph_key,
            user_id,
        } => {
            let result = manager.disconnect_graph(conn, &graph_key, &user_id).await;
            match result {
                Ok(()) => {
                    reply(conn, request_id.as_deref(), true, None, Map::new());
                    true
                }
                Err(e) => reply_error(conn, request_id.as_deref(), &e),
            }
        }

        ClientMessage::RegisterUserOnNodeConfig {
            request_id,
            node_config_key,
            user_id,
            user_name,
            from_timestamp,
            token,
        } => {
            if state.auth.validate(token.as_deref()).await.is_err() {
                tracing::warn!("Closing {}: register without valid auth", conn.conn_id);
                return false;
            }
            match manager
                .register_config(conn, &node_config_key, &user_id, &user_name, from_timestamp)
                .await
            {
                Ok(missing) => {
                    let mut extra = Map::new();
                    extra.insert("missingMessages".to_string(), json!(missing));
                    reply(conn, request_id.as_deref(), true, None, extra);
                    true
                }
                Err(e) => reply_error(conn, request_id.as_deref(), &e),
            }
        }

        ClientMessage::DisconnectUserOnNodeConfig {
            request_id,
            node_config_key,
            user_id,
        } => {
            let result = manager.disconnect_config(conn, &node_config_key, &user_id).await;
            match result {
                Ok(()) => {
                    reply(conn, request_id.as_deref(), true, None, Map::new());
                    true
                }
                Err(e) => reply_error(conn, request_id.as_deref(), &e),
            }
        }

        ClientMessage::ApplyInstructionToGraph {
            request_id,
            instructions,
        } => match manager.apply_graph_instructions(conn, instructions).await {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },

        ClientMessage::ApplyInstructionToNodeConfig {
            request_id,
            instructions,
        } => match manager.apply_config_instructions(conn, instructions).await {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },

        ClientMessage::GenerateUniqueId { request_id, ids } => {
            match manager.generate_unique_ids(conn, ids.len()).await {
                Ok(fresh) => {
                    let mut extra = Map::new();
                    extra.insert("ids".to_string(), json!(fresh));
                    reply(conn, request_id.as_deref(), true, None, extra);
                    true
                }
                Err(e) => reply_error(conn, request_id.as_deref(), &e),
            }
        }

        ClientMessage::BatchCreateElements {
            request_id,
            sheet_id,
            nodes,
            edges,
        } => match manager.batch_create(conn, &sheet_id, nodes, edges).await {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },

        ClientMessage::BatchDeleteElements {
            request_id,
            sheet_id,
            node_keys,
            edge_keys,
        } => match manager
            .batch_delete(conn, &sheet_id, node_keys, edge_keys)
            .await
        {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },

        ClientMessage::CreateSheet {
            request_id,
            key,
            name,
        } => match manager.create_sheet(conn, &key, &name).await {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },

        ClientMessage::RenameSheet {
            request_id,
            key,
            name,
        } => match manager.rename_sheet(conn, &key, &name).await {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },

        ClientMessage::DeleteSheet { request_id, key } => {
            match manager.delete_sheet(conn, &key).await {
                Ok(()) => {
                    reply(conn, request_id.as_deref(), true, None, Map::new());
                    true
                }
                Err(e) => reply_error(conn, request_id.as_deref(), &e),
            }
        }

        ClientMessage::ForceSave { request_id } => match manager.force_save(conn).await {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },

        ClientMessage::ToggleAutoSave {
            request_id,
            enabled,
        } => match manager.toggle_auto_save(conn, enabled).await {
            Ok(()) => {
                reply(conn, request_id.as_deref(), true, None, Map::new());
                true
            }
            Err(e) => reply_error(conn, request_id.as_deref(), &e),
        },
    }
}
