//! Realtime socket endpoint.
//!
//! The handshake runs before the upgrade, so rejected connections get a plain
//! HTTP error and never reach a room.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use devroom_core::{Admission, HandshakeRequest};
use devroom_types::{ClientEvent, ServerEvent};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/ws", get(connect))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectQuery {
    #[serde(default)]
    pub project_id: String,
    pub token: Option<String>,
}

/// `GET /ws?projectId=<id>[&token=<jwt>]`
pub async fn connect(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let request = HandshakeRequest {
        project_id: query.project_id,
        auth_token: query.token,
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned),
    };
    let admission = match state.gateway.handshake(request).await {
        Ok(admission) => admission,
        Err(e) => {
            debug!(error = %e, "socket handshake rejected");
            return ServerError::from(e).into_response();
        }
    };
    match ws {
        Ok(ws) => ws.on_upgrade(move |socket| serve_socket(socket, state, admission)),
        Err(rejection) => rejection.into_response(),
    }
}

async fn serve_socket(socket: WebSocket, state: Arc<AppState>, admission: Admission) {
    let connection = admission.session.connection_id;
    let span = info_span!(
        "socket",
        connection = %connection,
        room = %admission.session.room_id,
        user = %admission.session.user_id,
    );

    async move {
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut events) = mpsc::unbounded_channel();
        if let Err(e) = state.dispatcher.join(admission, outbound).await {
            warn!(error = %e, "could not join room");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if !send_event(&mut sink, &event).await {
                        break;
                    }
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientEvent>(text.as_str()) {
                        Ok(event) => {
                            if state.dispatcher.submit(connection, event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "unreadable frame");
                            let reply = ServerEvent::Error {
                                message: format!("unreadable frame: {e}"),
                            };
                            if !send_event(&mut sink, &reply).await {
                                break;
                            }
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(error = %e, "socket read failed");
                        break;
                    }
                },
            }
        }

        if let Err(e) = state.dispatcher.leave(connection).await {
            warn!(error = %e, "could not leave room");
        }
        info!("socket closed");
    }
    .instrument(span)
    .await
}

/// Write one frame; `false` once the peer is gone.
async fn send_event(sink: &mut SplitSink<WebSocket, Message>, event: &ServerEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(json) => sink.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "failed to encode server event");
            true
        }
    }
}
