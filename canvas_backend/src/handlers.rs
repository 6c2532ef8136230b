use crate::{
    AppState,
    room_state::CommandError,
    shared_types::{CommandRequest, RoomView},
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error};

// Every error a request can end in.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid command: {0}")]
    InvalidCommand(#[from] CommandError),
    #[error("invalid command body: {0}")]
    InvalidBody(#[from] JsonRejection),
    #[error("invalid command body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("room id must not be empty")]
    InvalidRoom,
    #[error("command task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidCommand(_)
            | AppError::InvalidBody(_)
            | AppError::InvalidJson(_)
            | AppError::InvalidRoom => StatusCode::BAD_REQUEST,
            AppError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidCommand(_) | AppError::InvalidBody(_) | AppError::InvalidJson(_) => {
                "invalid_command"
            }
            AppError::InvalidRoom => "invalid_room",
            AppError::Task(_) => "internal_error",
        }
    }
}

// JSON body sent back for a rejected request.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl From<&AppError> for ErrorBody {
    fn from(err: &AppError) -> Self {
        let error = match err {
            AppError::Task(_) => "Internal Server Error".to_string(),
            other => other.to_string(),
        };
        ErrorBody {
            error,
            code: err.code(),
        }
    }
}

// Converts our AppError into a user-friendly HTTP response.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Task(e) => error!("Command task error: {:?}", e),
            other => debug!("Rejected request: {}", other),
        }
        (self.status(), Json(ErrorBody::from(&self))).into_response()
    }
}

pub fn room_id(raw: String) -> Result<String, AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::InvalidRoom);
    }
    Ok(raw)
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    rooms: usize,
}

/// Liveness check with the number of rooms held in memory.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        rooms: state.registry.room_count().await,
    })
}

/// Handler to fetch the current lines of a room.
pub async fn get_room(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let id = room_id(id)?;
    Ok(Json(state.commands.fetch(&id).await))
}

/// Handler to submit a draw, undo, redo or sync command to a room.
pub async fn submit_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    WithRejection(Json(request), _): WithRejection<Json<CommandRequest>, AppError>,
) -> Result<Json<RoomView>, AppError> {
    let id = room_id(id)?;
    let view = state.commands.execute(&id, request).await?;
    Ok(Json(view))
}
