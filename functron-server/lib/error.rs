//! Error types for the functron server.
//!
//! Every handler error is rendered as a JSON body of the form
//! `{"error": "<kind>", "message": "<text>"}` with a status code matching its kind.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use functron_core::FunctronError;
use thiserror::Error;

use crate::payload::ErrorResponse;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a server operation.
pub type ServerResult<T> = Result<T, ServerError>;

/// An error that can occur while serving a request or starting the server.
#[derive(pretty_error_debug::Debug, Error)]
pub enum ServerError {
    /// The request was malformed.
    #[error(transparent)]
    ValidationError(#[from] ValidationError),

    /// The requested record, image or handle does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request conflicts with the current state, e.g. deleting a referenced image.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The server configuration is unusable.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Anything else.
    #[error("internal error: {0}")]
    InternalError(String),
}

/// Ways a request can be malformed.
#[derive(pretty_error_debug::Debug, Error)]
pub enum ValidationError {
    /// A field or path parameter is invalid.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ServerError {
    /// The status code this error is reported with.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::ConfigError(_) | ServerError::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServerError::ValidationError(_) => "validation_error",
            ServerError::NotFound(_) => "not_found",
            ServerError::Conflict(_) => "conflict",
            ServerError::ConfigError(_) => "config_error",
            ServerError::InternalError(_) => "internal_error",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl From<FunctronError> for ServerError {
    fn from(error: FunctronError) -> Self {
        let message = error.to_string();
        match error {
            FunctronError::InvalidArgument(_)
            | FunctronError::Utils(_)
            | FunctronError::Base64 { .. }
            | FunctronError::Json(_) => {
                ServerError::ValidationError(ValidationError::InvalidInput(message))
            }
            FunctronError::NoMatchingImage
            | FunctronError::ImageNotBuilt(_)
            | FunctronError::InvalidHandle(_) => ServerError::NotFound(message),
            FunctronError::ImageExists(_)
            | FunctronError::ImageInUse { .. }
            | FunctronError::InvalidStatusTransition { .. }
            | FunctronError::RefCountUnderflow(_) => ServerError::Conflict(message),
            FunctronError::InvalidConfig(_) => ServerError::ConfigError(message),
            _ => ServerError::InternalError(message),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }

        let body = ErrorResponse {
            error: self.kind().to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
