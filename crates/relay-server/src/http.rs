//! REST routes over the message service, for clients without a socket.
//!
//! These share validation and edit semantics with the chat channel but do
//! not broadcast; socket clients learn of HTTP writes on their next load.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use relay_core::errors::RelayError;
use relay_core::ids::MessageId;
use relay_core::messages::{Message, NewMessage};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::server::AppState;

/// HTTP-facing error with its status code.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound,
    Internal(&'static str),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Validation(msg) | RelayError::Malformed(msg) => Self::BadRequest(msg),
            RelayError::NotFound(_) => Self::NotFound,
            RelayError::Store(_) => Self::Internal("Internal server error"),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound => (StatusCode::NOT_FOUND, "Message not found".to_string()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.to_string()),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct EditBody {
    pub text: String,
}

pub async fn list_messages(State(state): State<AppState>) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.dispatcher.service().list().await?))
}

pub async fn create_message(
    State(state): State<AppState>,
    body: Result<Json<NewMessage>, JsonRejection>,
) -> Result<(StatusCode, Json<Message>), ApiError> {
    let Json(message) = body?;
    let saved = state.dispatcher.service().send(message).await?;
    tracing::info!(message_id = %saved.id, "message created over http");
    Ok((StatusCode::CREATED, Json(saved)))
}

pub async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Json<EditBody>, JsonRejection>,
) -> Result<Json<Message>, ApiError> {
    let Json(EditBody { text }) = body?;
    let id = MessageId::from_raw(id);
    Ok(Json(state.dispatcher.service().update(&id, &text).await?))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = MessageId::from_raw(id);
    if !state.dispatcher.service().delete(&id).await? {
        return Err(ApiError::NotFound);
    }
    Ok(Json(json!({ "message": "Message deleted successfully" })))
}

/// Liveness plus a store round-trip.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let dispatcher = &state.dispatcher;
    let online = dispatcher.presence().count();
    let connections = dispatcher.connections().count();
    match dispatcher.service().list().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "onlineUsers": online,
                "connections": connections,
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "error": e.to_string(),
                "onlineUsers": online,
                "connections": connections,
            })),
        ),
    }
}
