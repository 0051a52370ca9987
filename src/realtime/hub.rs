//! WebSocket hub endpoint.
//!
//! Each authenticated connection joins exactly one group, derived from the
//! recipient id in its token, and leaves it when the socket closes.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::message::{ClientMessage, OutboundMessage, ServerMessage};
use super::publisher::group_name;
use super::registry::ConnectionHandle;
use crate::auth::JwtValidator;
use crate::error::AppError;
use crate::metrics::HubMetrics;
use crate::server::AppState;

const CHANNEL_BUFFER_SIZE: usize = 32;

#[derive(Debug, Deserialize)]
pub struct HubQuery {
    pub access_token: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "hub.upgrade",
    skip(ws, state, query, headers),
    fields(has_query_token = query.access_token.is_some())
)]
pub async fn hub_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HubQuery>,
    headers: HeaderMap,
) -> Response {
    let recipient = match authenticate(&state.jwt_validator, &query, &headers) {
        Ok(recipient) => recipient,
        Err(e) => {
            HubMetrics::record_rejected();
            return e.into_response();
        }
    };

    tracing::debug!(recipient = %recipient, "Hub upgrade accepted");

    ws.on_upgrade(move |socket| handle_socket(socket, state, recipient))
}

/// Resolve the recipient id from the bearer token.
pub fn authenticate(
    validator: &JwtValidator,
    query: &HubQuery,
    headers: &HeaderMap,
) -> Result<Uuid, AppError> {
    let token = extract_token(query, headers)
        .ok_or_else(|| AppError::Auth("Missing authentication token".to_string()))?;

    let claims = validator.validate(&token).map_err(|e| {
        tracing::warn!(error = %e, "Hub token rejected");
        e
    })?;

    claims
        .recipient_id()
        .ok_or_else(|| AppError::Auth("Token does not identify a recipient".to_string()))
}

/// Token from the `access_token` query parameter or the Authorization header
fn extract_token(query: &HubQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.access_token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[tracing::instrument(
    name = "hub.connection",
    skip(socket, state),
    fields(otel.kind = "server")
)]
async fn handle_socket(socket: WebSocket, state: AppState, recipient: Uuid) {
    let connection_start = std::time::Instant::now();
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(CHANNEL_BUFFER_SIZE);

    let group = group_name(&state.settings.web.group_prefix, recipient);
    let handle = state.registry.join(recipient, group.clone(), tx);
    let connection_id = handle.id;
    HubMetrics::connection_opened();

    tracing::info!(
        connection_id = %connection_id,
        group = %group,
        "Hub connection established"
    );

    let _ = handle
        .send(ServerMessage::Connected {
            connection_id,
            group,
        })
        .await;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match msg.to_json() {
                Ok(t) => t,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize message");
                    continue;
                }
            };

            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let recv_handle = handle.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(result) = ws_receiver.next().await {
            match result {
                Ok(msg) => {
                    if !process_message(msg, &recv_handle).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    let send_abort = send_task.abort_handle();
    let recv_abort = recv_task.abort_handle();

    tokio::select! {
        _ = send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
        }
        _ = recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
        }
        _ = handle.closed() => {
            tracing::debug!(connection_id = %connection_id, "Connection closed by server");
        }
    }
    send_abort.abort();
    recv_abort.abort();

    if state.registry.leave(connection_id).is_none() {
        tracing::debug!(connection_id = %connection_id, "Connection already removed by stale cleanup");
    }
    HubMetrics::connection_closed();

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "Hub connection closed"
    );
}

/// Returns false if the connection should be closed
async fn process_message(msg: Message, handle: &Arc<ConnectionHandle>) -> bool {
    match msg {
        Message::Text(text) => {
            handle.update_activity();

            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Ping) => {
                    let _ = handle.send(ServerMessage::Pong).await;
                }
                Ok(ClientMessage::Pong) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Failed to parse client message");
                    let _ = handle
                        .send(ServerMessage::error("INVALID_MESSAGE", e.to_string()))
                        .await;
                }
            }
            true
        }
        Message::Binary(_) => {
            let _ = handle
                .send(ServerMessage::error(
                    "UNSUPPORTED_FORMAT",
                    "Binary messages are not supported",
                ))
                .await;
            true
        }
        Message::Ping(_) | Message::Pong(_) => {
            handle.update_activity();
            true
        }
        Message::Close(_) => {
            tracing::debug!(connection_id = %handle.id, "Received close frame");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::config::JwtConfig;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::collections::HashMap;

    const SECRET: &str = "hub-test-secret";

    fn validator() -> JwtValidator {
        JwtValidator::new(&JwtConfig {
            secret: SECRET.to_string(),
            issuer: None,
            audience: None,
        })
    }

    fn token(sub: Option<String>) -> String {
        let claims = Claims {
            sub,
            exp: chrono::Utc::now().timestamp() + 300,
            iat: chrono::Utc::now().timestamp(),
            extra: HashMap::new(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn query(token: Option<String>) -> HubQuery {
        HubQuery {
            access_token: token,
        }
    }

    #[test]
    fn test_query_token_identifies_recipient() {
        let recipient = Uuid::new_v4();
        let result = authenticate(
            &validator(),
            &query(Some(token(Some(recipient.to_string())))),
            &HeaderMap::new(),
        );
        assert_eq!(result.unwrap(), recipient);
    }

    #[test]
    fn test_bearer_header_identifies_recipient() {
        let recipient = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token(Some(recipient.to_string())));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());

        let result = authenticate(&validator(), &query(None), &headers);
        assert_eq!(result.unwrap(), recipient);
    }

    #[test]
    fn test_missing_or_bad_identity_rejected() {
        let v = validator();
        assert!(matches!(
            authenticate(&v, &query(None), &HeaderMap::new()),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            authenticate(&v, &query(Some(token(Some("not-a-uuid".into())))), &HeaderMap::new()),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            authenticate(&v, &query(Some(token(None))), &HeaderMap::new()),
            Err(AppError::Auth(_))
        ));
        assert!(matches!(
            authenticate(&v, &query(Some("garbage".into())), &HeaderMap::new()),
            Err(AppError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_client_ping_gets_pong() {
        let registry = crate::realtime::GroupRegistry::new();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = registry.join(Uuid::new_v4(), "user-p".to_string(), tx);

        assert!(process_message(Message::Text(r#"{"type":"ping"}"#.into()), &handle).await);
        let reply = rx.recv().await.unwrap().to_json().unwrap();
        assert_eq!(reply, r#"{"type":"pong"}"#);

        assert!(!process_message(Message::Close(None), &handle).await);
    }
}
