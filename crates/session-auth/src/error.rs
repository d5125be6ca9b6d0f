//! Error types for credential storage and session renewal

/// Errors from credential storage and the renewal endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token refresh failed: {0}")]
    TokenExchange(String),

    #[error("refresh token rejected: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl Error {
    /// Whether the server explicitly refused the refresh token, as opposed to
    /// the renewal call failing in transit.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::InvalidCredentials(_))
    }
}

/// Result alias for session-auth operations.
pub type Result<T> = std::result::Result<T, Error>;
