//! Error types for the gateway.

use thiserror::Error;

/// Message used when a failure carries no usable description.
pub const DEFAULT_ERROR_MESSAGE: &str = "Internal server error";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The inbound path maps to no known dialect.
    #[error("Path {path} does not exist")]
    UnknownEndpoint { path: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// The backend answered with a non-2xx status.
    #[error("Backend error: {status} {message}")]
    Backend { status: u16, message: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GatewayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Backend failure; an empty message falls back to [`DEFAULT_ERROR_MESSAGE`].
    pub fn backend(status: u16, msg: impl Into<String>) -> Self {
        let message = msg.into();
        let message = if message.trim().is_empty() {
            DEFAULT_ERROR_MESSAGE.to_string()
        } else {
            message
        };
        Self::Backend { status, message }
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// HTTP status the caller should see for this failure.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownEndpoint { .. } => 404,
            Self::InvalidRequest { .. } | Self::Json(_) => 400,
            Self::Backend { status, .. } if (400..=599).contains(status) => *status,
            Self::Provider { .. } | Self::Http(_) => 502,
            _ => 500,
        }
    }

    /// Message exposed to the caller, without the variant prefix.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::Backend { message, .. }
            | Self::InvalidRequest { message }
            | Self::Provider { message }
            | Self::Translation { message }
            | Self::Config { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
