//! Agent hub: the duplex WebSocket endpoint.
//!
//! Each connected agent gets a bounded channel and a writer task. Commands
//! published on the Engine bus are routed into the target's channel; the
//! writer marks each command `Sent` once its frame has been written. Frames
//! from the agent are validated and published on the bus.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{Sink, SinkExt, StreamExt};
use gamelink_domain::{Message, MessageKind, ServerId};
use gamelink_shared::{HubFrame, MessageBus, MessageFilter, Subscription};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::connections::ConnectionRegistry;
use crate::app::App;
use crate::use_cases::command_queue::CommandQueue;

/// Buffer size for per-connection outbound channels.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

#[derive(Debug, Deserialize)]
pub struct HubParams {
    #[serde(rename = "serverId")]
    pub server_id: ServerId,
}

/// Forward every bus command to its target's connection.
///
/// A target without a live connection is reported as a failed delivery; the
/// command stays `Pending` and is replayed when the agent connects.
pub fn install_command_router(bus: &MessageBus, connections: Arc<ConnectionRegistry>) -> Subscription {
    bus.subscribe(MessageFilter::Kind(MessageKind::Command), move |message| {
        connections.route(message)?;
        Ok(())
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// WebSocket upgrade handler. Requires a valid bearer token.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HubParams>,
    headers: HeaderMap,
    State(app): State<Arc<App>>,
) -> Response {
    let Some(bearer) = bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Missing bearer token").into_response();
    };
    if let Err(e) = app.tokens.validate(bearer) {
        tracing::warn!(server_id = %params.server_id, error = %e, "Hub connection rejected");
        return (StatusCode::UNAUTHORIZED, e.to_string()).into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, app, params.server_id))
}

/// Write routed messages to the agent until the channel or the socket closes.
///
/// A command becomes `Sent` only after its frame was written. Anything still
/// in the channel when the socket dies stays `Pending` for the next replay.
async fn write_to_agent<S>(queue: Arc<CommandQueue>, mut rx: mpsc::Receiver<Message>, mut sink: S)
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    while let Some(message) = rx.recv().await {
        let id = message.id();
        let is_command = message.is_command();

        let text = match HubFrame::ReceiveEvent(message).encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode hub frame");
                continue;
            }
        };
        if let Err(e) = sink.send(WsMessage::Text(text.into())).await {
            tracing::debug!(message_id = %id, error = %e, "Hub write failed");
            break;
        }

        if is_command {
            if let Err(e) = queue.mark_sent(id).await {
                tracing::warn!(command_id = %id, error = %e, "Failed to mark command sent");
            }
        }
    }
}

/// Handle an individual agent connection.
async fn handle_socket(socket: WebSocket, app: Arc<App>, server_id: ServerId) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel::<Message>(CONNECTION_CHANNEL_BUFFER);

    // Held before the connection is routable so a command issued now cannot
    // overtake the backlog.
    app.queue.hold_live_commands(server_id).await;

    if let Some(previous) =
        app.connections
            .register(server_id, connection_id, app.bus.clock().now(), tx)
    {
        tracing::info!(
            server_id = %server_id,
            previous_connection = %previous,
            "Agent reconnected, replacing previous connection"
        );
    }
    tracing::info!(server_id = %server_id, connection_id = %connection_id, "Agent connected");

    let send_task = tokio::spawn(write_to_agent(app.queue.clone(), rx, ws_sender));

    // Connectivity to this server is confirmed: flush its backlog.
    if let Err(e) = app.queue.replay_held(server_id).await {
        tracing::error!(server_id = %server_id, error = %e, "Replay failed");
    }

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(WsMessage::Text(text)) => handle_frame(&app, server_id, text.as_str()),
            Ok(WsMessage::Close(_)) => {
                tracing::info!(server_id = %server_id, "Hub connection closed by agent");
                break;
            }
            Err(e) => {
                tracing::warn!(server_id = %server_id, error = %e, "Hub connection error");
                break;
            }
            _ => {}
        }
    }

    app.connections.unregister(server_id, connection_id);
    send_task.abort();
    tracing::info!(server_id = %server_id, connection_id = %connection_id, "Agent disconnected");
}

/// Validate an inbound frame and publish its message on the Engine bus.
fn handle_frame(app: &App, server_id: ServerId, text: &str) {
    let message = match HubFrame::decode(text) {
        Ok(HubFrame::PublishEvent(message)) => message,
        Ok(HubFrame::ReceiveEvent(message)) => {
            tracing::warn!(
                server_id = %server_id,
                message_type = %message.message_type(),
                "Agent sent a server-to-client frame, ignoring"
            );
            return;
        }
        Err(e) => {
            tracing::warn!(server_id = %server_id, error = %e, "Failed to parse hub frame");
            return;
        }
    };

    if let Err(e) = app.registry.validate(&message) {
        tracing::warn!(server_id = %server_id, error = %e, "Rejected inbound message");
        return;
    }
    if message.is_command() {
        tracing::warn!(
            server_id = %server_id,
            message_type = %message.message_type(),
            "Agents may only publish events"
        );
        return;
    }
    if let Some(scope) = message.target_server_id() {
        if scope != server_id {
            tracing::warn!(
                server_id = %server_id,
                claimed = %scope,
                "Event scoped to a different server, ignoring"
            );
            return;
        }
    }

    app.bus.publish(&message);
}
