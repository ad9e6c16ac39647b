use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt::{self, Display};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    MissingParameter,
    InvalidTimezone,
    InvalidRange,
    InvalidConfig,
    InvalidOperation,
    ConfigCorrupt,
    UpstreamError,
    NotFound,
    Unexpected,
}

impl ErrorKind {
    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingParameter
            | Self::InvalidTimezone
            | Self::InvalidRange
            | Self::InvalidConfig
            | Self::InvalidOperation => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::ConfigCorrupt | Self::UpstreamError | Self::Unexpected => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
    pub debug: Option<String>,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            debug: None,
        }
    }

    pub fn with_debug(mut self, debug: impl Display) -> Self {
        self.debug = Some(debug.to_string());
        self
    }

    pub fn missing_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MissingParameter, message)
    }

    pub fn invalid_timezone() -> Self {
        Self::new(
            ErrorKind::InvalidTimezone,
            "Invalid timezone format. Expected offset like \"+8\" or \"-0500\"",
        )
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRange, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn invalid_operation() -> Self {
        Self::new(ErrorKind::InvalidOperation, "BFF: Invalid operation")
    }

    pub fn config_corrupt(debug: impl Display) -> Self {
        Self::new(ErrorKind::ConfigCorrupt, "Stored configuration is not valid JSON")
            .with_debug(debug)
    }

    pub fn upstream(debug: impl Display) -> Self {
        Self::new(ErrorKind::UpstreamError, "An error occurred").with_debug(debug)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn unexpected(err: impl Display) -> Self {
        Self::new(ErrorKind::Unexpected, "An error occurred").with_debug(err)
    }

    pub fn status(&self) -> StatusCode {
        self.kind.status()
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.debug {
            Some(debug) => write!(f, "{}: {}", self.message, debug),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for AppError {}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::missing_parameter(format!("Invalid request body: {}", rejection.body_text()))
    }
}

#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiEnvelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(kind = ?self.kind, error = %self, "request failed");
        } else {
            tracing::debug!(kind = ?self.kind, error = %self, "request rejected");
        }
        let body = ErrorEnvelope {
            success: false,
            message: self.message,
            debug: self.debug,
        };
        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
