//! Error types and HTTP status mapping

use serde::Serialize;
use thiserror::Error;

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// API error with HTTP status code mapping
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    #[error("{message}")]
    InvalidRequest { message: String },

    #[error("invalid token: {message}")]
    InvalidToken { message: String },

    #[error("token verification failed: {message}")]
    TokenVerificationFailed { message: String },

    #[error("{message}")]
    InstallationNotFound { message: String },

    #[error("{message}")]
    Forbidden { message: String },

    #[error("Method Not Allowed")]
    MethodNotAllowed,

    /// Non-success response from the GitHub API
    #[error("unexpected status code: {status}, message: {message}, documentation_url: {documentation_url}")]
    UnexpectedStatusCode {
        status: u16,
        message: String,
        documentation_url: String,
    },

    #[error("internal error: {message}")]
    Internal { message: String },

    #[error("upstream error: {message}")]
    UpstreamError { message: String },

    #[error("upstream timeout")]
    UpstreamTimeout,
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken {
            message: message.into(),
        }
    }

    pub fn token_verification_failed(message: impl Into<String>) -> Self {
        Self::TokenVerificationFailed {
            message: message.into(),
        }
    }

    pub fn installation_not_found(message: impl Into<String>) -> Self {
        Self::InstallationNotFound {
            message: message.into(),
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn upstream_error(message: impl Into<String>) -> Self {
        Self::UpstreamError {
            message: message.into(),
        }
    }

    /// Whether this is an upstream response with the given status code
    pub fn is_status(&self, code: u16) -> bool {
        matches!(self, Self::UnexpectedStatusCode { status, .. } if *status == code)
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::InvalidToken { .. } => 400,
            Self::TokenVerificationFailed { .. } => 400,
            Self::InstallationNotFound { .. } => 400,
            Self::Forbidden { .. } => 403,
            Self::MethodNotAllowed => 405,
            Self::UnexpectedStatusCode { .. } => 500,
            Self::Internal { .. } => 500,
            Self::UpstreamError { .. } => 500,
            Self::UpstreamTimeout => 500,
        }
    }

    /// Get the error key for this error
    pub fn error_key(&self) -> &'static str {
        match self {
            Self::InvalidRequest { .. } => "invalid_request",
            Self::InvalidToken { .. } => "invalid_token",
            Self::TokenVerificationFailed { .. } => "token_verification_failed",
            Self::InstallationNotFound { .. } => "installation_not_found",
            Self::Forbidden { .. } => "forbidden",
            Self::MethodNotAllowed => "method_not_allowed",
            Self::UnexpectedStatusCode { .. } => "unexpected_status_code",
            Self::Internal { .. } => "internal_error",
            Self::UpstreamError { .. } => "upstream_error",
            Self::UpstreamTimeout => "upstream_timeout",
        }
    }

    /// Message that is safe to show to the caller.
    ///
    /// Only client-side failures carry their message out; everything that
    /// ends up as a 500 is reduced to a generic body.
    pub fn public_message(&self) -> String {
        if self.status_code() < 500 {
            self.to_string()
        } else {
            "Internal Server Error".to_string()
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            message: err.public_message(),
        }
    }
}
