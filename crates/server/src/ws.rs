//! Push bus websocket endpoint
//!
//! `GET /ws?token=JWT`. The connection authenticates once at upgrade
//! time, then exchanges JSON frames: the client sends
//! `{"action": "subscribe" | "unsubscribe", "runId": "..."}`, the server
//! pushes run events. Each connection is an actor: a writer task draining
//! a mailbox, the reader loop below, and one forwarder task per
//! subscription. Idle connections are pinged every 30 s and dropped when
//! they fail to answer before the next tick; shutdown sends a going-away
//! close to everyone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use atelier_application::PushBus;
use atelier_core::{RunId, TenantId};
use atelier_ports::{RunRepository, TokenService};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::error::ApiError;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAILBOX_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct WsApiState {
    pub tokens: Arc<dyn TokenService>,
    pub runs: Arc<dyn RunRepository>,
    pub bus: Arc<PushBus>,
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientMessage {
    action: String,
    run_id: RunId,
}

pub async fn ws_handler(
    State(state): State<WsApiState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match state.tokens.verify(&query.token) {
        Ok(claims) => claims,
        Err(e) => return ApiError::from(e).into_response(),
    };
    ws.on_upgrade(move |socket| handle_connection(state, socket, claims.tenant_id))
}

async fn handle_connection(state: WsApiState, socket: WebSocket, tenant_id: TenantId) {
    let (mut sink, mut stream) = socket.split();
    let (mailbox, mut outbound) = mpsc::channel::<Message>(MAILBOX_CAPACITY);

    // Writer half of the actor: the only task touching the sink.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if sink.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut subscriptions: HashMap<RunId, AbortHandle> = HashMap::new();
    let mut shutdown = state.bus.shutdown_signal();
    let mut ping = tokio::time::interval(PING_INTERVAL);
    ping.tick().await; // the first tick fires immediately
    let mut awaiting_pong = false;

    debug!(tenant_id = %tenant_id, "push connection opened");

    loop {
        tokio::select! {
            _ = ping.tick() => {
                if awaiting_pong {
                    debug!(tenant_id = %tenant_id, "connection missed ping, closing");
                    break;
                }
                awaiting_pong = true;
                if mailbox.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = shutdown.recv() => {
                let _ = mailbox
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::AWAY,
                        reason: "server shutting down".into(),
                    })))
                    .await;
                break;
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, tenant_id, &text, &mailbox, &mut subscriptions)
                            .await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(tenant_id = %tenant_id, error = %e, "websocket error");
                        break;
                    }
                }
            }
        }
    }

    for (_, handle) in subscriptions {
        handle.abort();
    }
    drop(mailbox);
    let _ = writer.await;
    debug!(tenant_id = %tenant_id, "push connection closed");
}

async fn handle_client_message(
    state: &WsApiState,
    tenant_id: TenantId,
    text: &str,
    mailbox: &mpsc::Sender<Message>,
    subscriptions: &mut HashMap<RunId, AbortHandle>,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            let _ = send_json(
                mailbox,
                json!({"type": "error", "message": format!("malformed message: {e}")}),
            )
            .await;
            return;
        }
    };

    match message.action.as_str() {
        "subscribe" => {
            // A subscriber only sees runs of its own tenant.
            match state.runs.get_run(tenant_id, message.run_id).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    let _ = send_json(
                        mailbox,
                        json!({"type": "error", "message": "run not found"}),
                    )
                    .await;
                    return;
                }
                Err(e) => {
                    warn!(error = %e, "subscription lookup failed");
                    return;
                }
            }
            if subscriptions.contains_key(&message.run_id) {
                return;
            }

            let mut receiver = state.bus.subscribe(message.run_id).await;
            let forward_to = mailbox.clone();
            let task = tokio::spawn(async move {
                while let Ok(event) = receiver.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(payload) => {
                            if forward_to.send(Message::Text(payload.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "failed to serialize push event"),
                    }
                }
            });
            subscriptions.insert(message.run_id, task.abort_handle());
            info!(run_id = %message.run_id, "subscribed");
            let _ = send_json(
                mailbox,
                json!({"type": "subscribed", "runId": message.run_id}),
            )
            .await;
        }
        "unsubscribe" => {
            if let Some(handle) = subscriptions.remove(&message.run_id) {
                handle.abort();
            }
            let _ = send_json(
                mailbox,
                json!({"type": "unsubscribed", "runId": message.run_id}),
            )
            .await;
        }
        other => {
            let _ = send_json(
                mailbox,
                json!({"type": "error", "message": format!("unknown action: {other}")}),
            )
            .await;
        }
    }
}

async fn send_json(
    mailbox: &mpsc::Sender<Message>,
    value: serde_json::Value,
) -> Result<(), mpsc::error::SendError<Message>> {
    mailbox.send(Message::Text(value.to_string().into())).await
}

pub fn ws_routes(state: WsApiState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}
