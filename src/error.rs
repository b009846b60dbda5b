//! Crate-wide error types.

use thiserror::Error;

use crate::{DecodeError, LabelError, StorageError, TimeExprError};

pub type StackpileResult<T> = Result<T, StackpileError>;

#[derive(Debug, Error)]
pub enum StackpileError {
    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid time expression: {0}")]
    Time(#[from] TimeExprError),

    #[error("invalid labels: {0}")]
    Label(#[from] LabelError),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("request body exceeds {0} bytes")]
    BodyTooLarge(u64),

    #[error("request body read failed: {0}")]
    BodyRead(String),

    #[error("http error: {0}")]
    Http(String),
}

impl From<hyper::Error> for StackpileError {
    fn from(value: hyper::Error) -> Self {
        Self::Http(value.to_string())
    }
}

impl StackpileError {
    /// Short machine-readable code used in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Toml(_) => "toml",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Time(_) => "invalid_time",
            Self::Label(_) => "invalid_labels",
            Self::Decode(_) => "malformed_input",
            Self::Storage(StorageError::InvalidRange { .. }) => "invalid_range",
            Self::Storage(_) => "storage",
            Self::BodyTooLarge(_) => "body_too_large",
            Self::BodyRead(_) => "body_read",
            Self::Http(_) => "http",
        }
    }

    /// Errors caused by the request itself rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_)
                | Self::Time(_)
                | Self::Label(_)
                | Self::Decode(_)
                | Self::Storage(StorageError::InvalidRange { .. })
                | Self::BodyTooLarge(_)
                | Self::BodyRead(_)
        )
    }

    pub fn http_status(&self) -> hyper::StatusCode {
        if let Self::BodyTooLarge(_) = self {
            hyper::StatusCode::PAYLOAD_TOO_LARGE
        } else if self.is_client_error() {
            hyper::StatusCode::BAD_REQUEST
        } else {
            hyper::StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
