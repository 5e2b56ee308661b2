use axum::{
    extract::rejection::FormRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use lvl_core::LevelError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Level(#[from] LevelError),
    #[error("invalid form: {0}")]
    Form(#[from] FormRejection),
    #[error("render error: {0}")]
    Render(#[from] handlebars::RenderError),
    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Level(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Form(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Level(LevelError::InvalidInput(_)) => "invalid_input",
            ApiError::Level(LevelError::TaskNotFound(_)) => "task_not_found",
            ApiError::Level(LevelError::AlreadyCompleted(_)) => "already_completed",
            ApiError::Level(LevelError::Store(_)) => "store_error",
            ApiError::Form(_) => "invalid_form",
            ApiError::Render(_) => "render_error",
            ApiError::Join(_) => "worker_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_client_error() {
            warn!(event = "request_rejected", code = self.code(), error = %self);
            (status, self.to_string()).into_response()
        } else {
            error!(event = self.code(), error = %self);
            (status, "internal server error").into_response()
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
