//! Error types for the API client crate.

use thiserror::Error;

/// Result type alias for API client operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Structured error codes reported by the identity server.
///
/// The fatal subset forces an immediate credential reset before the error
/// reaches the caller; everything else surfaces without side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorCode {
    InvalidClient,
    InvalidGrant,
    InvalidScope,
    UnauthorizedClient,
    UnsupportedGrantType,
    ServerError,
    AccountSuspended,
    AccountLocked,
    InvalidRefreshToken,
    Other,
}

impl AuthErrorCode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "invalid_client" => Self::InvalidClient,
            "invalid_grant" => Self::InvalidGrant,
            "invalid_scope" => Self::InvalidScope,
            "unauthorized_client" => Self::UnauthorizedClient,
            "unsupported_grant_type" => Self::UnsupportedGrantType,
            "server_error" => Self::ServerError,
            "account_suspended" => Self::AccountSuspended,
            "account_locked" => Self::AccountLocked,
            "invalid_refresh_token" => Self::InvalidRefreshToken,
            _ => Self::Other,
        }
    }

    /// True for the subset of server rejections that invalidate the
    /// session as a whole.
    pub fn is_fatal(self) -> bool {
        !matches!(self, Self::Other)
    }
}

/// Errors that can occur during API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unstructured API error response
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Structured rejection from the identity server
    #[error("Auth server rejected request ({status}): {code:?}: {description}")]
    Oauth {
        status: u16,
        code: AuthErrorCode,
        description: String,
    },

    /// A response body could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Refresh was attempted with no stored refresh token. The session is
    /// reset before this error surfaces.
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Login/exchange attempted on an already established session
    #[error("Already logged in")]
    AlreadyLoggedIn,

    /// Core-layer failure (secret store, decoding)
    #[error(transparent)]
    Core(#[from] mirrorkit_core::Error),
}

impl ApiError {
    /// Create an unstructured API error from status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_data(message: impl Into<String>) -> Self {
        Self::InvalidData(message.into())
    }

    /// HTTP status if the server produced this error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } | Self::Oauth { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when this error must reset the session before surfacing.
    /// Transport errors never qualify.
    pub fn is_fatal_auth(&self) -> bool {
        match self {
            Self::Oauth { code, .. } => code.is_fatal(),
            Self::MissingRefreshToken => true,
            _ => false,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } | Self::Oauth { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(_) => ApiRetryClass::Retryable,
            Self::Json(_) | Self::InvalidData(_) => ApiRetryClass::Permanent,
            Self::MissingRefreshToken | Self::AlreadyLoggedIn => ApiRetryClass::ReauthRequired,
            Self::Core(_) => ApiRetryClass::Permanent,
        }
    }
}

impl From<ApiError> for mirrorkit_core::Error {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Core(inner) => inner,
            other => mirrorkit_core::Error::InvalidData(other.to_string()),
        }
    }
}
