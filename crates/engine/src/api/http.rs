//! HTTP routes: token exchange and a small operator surface over the
//! command queue.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use gamelink_domain::{BufferedCommand, Message, MessageError, MessageId, MessagePayload, ServerId};
use gamelink_shared::{
    protocol::TOKEN_PATH, AnnounceMessage, BanPlayer, KickPlayer, MessageBus, TokenRequest,
    TokenResponse, UpdateConfig,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::connections::ConnectionInfo;
use crate::app::App;
use crate::use_cases::command_queue::{CommandStatusReport, QueueError};

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(health))
        .route("/api/health", get(health))
        .route(TOKEN_PATH, post(issue_token))
        .route("/api/servers", get(list_servers))
        .route("/api/servers/{server_id}/commands", post(issue_command))
        .route(
            "/api/servers/{server_id}/commands/pending",
            get(list_pending),
        )
        .route("/api/commands/stale", get(list_stale))
        .route(
            "/api/commands/{id}",
            get(get_command).delete(acknowledge_command),
        )
}

async fn health() -> &'static str {
    "OK"
}

async fn issue_token(
    State(app): State<Arc<App>>,
    Json(request): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let issued = app.tokens.issue(&request.access_token).map_err(|e| {
        tracing::warn!(error = %e, "Token exchange rejected");
        ApiError::Unauthorized(e.to_string())
    })?;

    let expires_in = (issued.expires_at - app.bus.clock().now())
        .num_seconds()
        .max(0) as u64;

    Ok(Json(TokenResponse {
        access_token: issued.token,
        token_type: "Bearer".to_string(),
        expires_in,
    }))
}

async fn list_servers(State(app): State<Arc<App>>) -> Json<Vec<ConnectionInfo>> {
    Json(app.connections.list())
}

/// Body of `POST /api/servers/{server_id}/commands`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCommandRequest {
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueCommandResponse {
    pub id: MessageId,
}

fn typed_command<T: MessagePayload>(
    bus: &MessageBus,
    target: ServerId,
    data: serde_json::Value,
) -> Result<Message, MessageError> {
    let payload: T = serde_json::from_value(data)
        .map_err(|e| MessageError::serialization(T::MESSAGE_TYPE, e))?;
    bus.create_command::<T>(target, |p| *p = payload)
}

fn build_command(
    bus: &MessageBus,
    target: ServerId,
    request: IssueCommandRequest,
) -> Result<Message, MessageError> {
    match request.message_type.as_str() {
        KickPlayer::MESSAGE_TYPE => typed_command::<KickPlayer>(bus, target, request.data),
        BanPlayer::MESSAGE_TYPE => typed_command::<BanPlayer>(bus, target, request.data),
        UpdateConfig::MESSAGE_TYPE => typed_command::<UpdateConfig>(bus, target, request.data),
        AnnounceMessage::MESSAGE_TYPE => {
            typed_command::<AnnounceMessage>(bus, target, request.data)
        }
        other => Err(MessageError::UnknownType(other.to_string())),
    }
}

/// Queue a command. `202 Accepted` means durably recorded, not executed.
async fn issue_command(
    State(app): State<Arc<App>>,
    Path(server_id): Path<ServerId>,
    Json(request): Json<IssueCommandRequest>,
) -> Result<(StatusCode, Json<IssueCommandResponse>), ApiError> {
    let command = build_command(&app.bus, server_id, request)?;
    let id = app.queue.publish_command(command).await?;
    Ok((StatusCode::ACCEPTED, Json(IssueCommandResponse { id })))
}

async fn list_pending(
    State(app): State<Arc<App>>,
    Path(server_id): Path<ServerId>,
) -> Result<Json<Vec<BufferedCommand>>, ApiError> {
    Ok(Json(app.queue.get_pending_commands(server_id).await?))
}

async fn list_stale(State(app): State<Arc<App>>) -> Result<Json<Vec<BufferedCommand>>, ApiError> {
    Ok(Json(app.queue.stale_commands().await?))
}

async fn get_command(
    State(app): State<Arc<App>>,
    Path(id): Path<MessageId>,
) -> Result<Json<CommandStatusReport>, ApiError> {
    app.queue
        .command_status(id)
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound)
}

async fn acknowledge_command(
    State(app): State<Arc<App>>,
    Path(id): Path<MessageId>,
) -> Result<StatusCode, ApiError> {
    if app.queue.acknowledge(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound)
    }
}

#[derive(Debug)]
pub enum ApiError {
    NotFound,
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not found").into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
            }
        }
    }
}

impl From<MessageError> for ApiError {
    fn from(e: MessageError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::Message(e) => e.into(),
            QueueError::Store(e) => ApiError::Internal(e.to_string()),
        }
    }
}
