//! Failure taxonomy for API calls
//!
//! Every failure surfaced by the client is a `RequestError`. The kind says
//! what happened; `category()` groups kinds by layer:
//!
//! - transport: network, timeout, abort
//! - protocol: HTTP status, domain code, undecodable body
//! - auth: renewal could not recover the session

use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;

use crate::messages::{CANCELED_MESSAGE, NETWORK_ERROR_MESSAGE, SESSION_EXPIRED_MESSAGE};

/// Why session recovery failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    NoRefreshToken,
    RefreshFailed,
    RefreshExhausted,
    /// The single replay after a successful renewal was still rejected
    ReplayStillUnauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Timeout,
    Abort,
    HttpStatus,
    DomainCode,
    Decode,
    Auth(AuthErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    Auth,
}

impl ErrorKind {
    pub fn category(self) -> ErrorCategory {
        match self {
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Abort => ErrorCategory::Transport,
            ErrorKind::HttpStatus | ErrorKind::DomainCode | ErrorKind::Decode => {
                ErrorCategory::Protocol
            }
            ErrorKind::Auth(_) => ErrorCategory::Auth,
        }
    }

    /// Stable label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Abort => "abort",
            ErrorKind::HttpStatus => "http_status",
            ErrorKind::DomainCode => "domain_code",
            ErrorKind::Decode => "decode",
            ErrorKind::Auth(_) => "auth",
        }
    }
}

/// A classified failure with the context needed by hooks and callers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    pub kind: ErrorKind,
    pub message: String,
    /// Request path, relative to the API base
    pub path: String,
    pub status: Option<u16>,
    pub status_text: Option<String>,
    /// Decoded response body, when there was one
    pub payload: Option<Value>,
}

impl RequestError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: path.into(),
            status: None,
            status_text: None,
            payload: None,
        }
    }

    pub fn network(path: &str, detail: impl std::fmt::Display) -> Self {
        tracing::debug!(path, error = %detail, "transport failure");
        Self::new(ErrorKind::Network, NETWORK_ERROR_MESSAGE, path)
    }

    pub fn timeout(path: &str, after: Duration) -> Self {
        Self::new(
            ErrorKind::Timeout,
            format!("Request timed out after {}ms", after.as_millis()),
            path,
        )
    }

    pub fn aborted(path: &str) -> Self {
        Self::new(ErrorKind::Abort, CANCELED_MESSAGE, path)
    }

    pub fn http_status(
        path: &str,
        status: StatusCode,
        message: impl Into<String>,
        payload: Option<Value>,
    ) -> Self {
        Self {
            payload,
            ..Self::new(ErrorKind::HttpStatus, message, path).with_status(status)
        }
    }

    pub fn domain(path: &str, status: StatusCode, message: impl Into<String>, payload: Value) -> Self {
        Self {
            payload: Some(payload),
            ..Self::new(ErrorKind::DomainCode, message, path).with_status(status)
        }
    }

    pub fn decode(path: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message, path)
    }

    /// Session recovery failure that did not start from a rejected response.
    pub fn auth(kind: AuthErrorKind, path: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth(kind), message, path).with_status(StatusCode::UNAUTHORIZED)
    }

    /// Classify a reqwest failure.
    pub fn from_transport(path: &str, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::new(ErrorKind::Timeout, "Request timed out", path);
        }
        if error.is_decode() {
            return Self::decode(path, crate::messages::PARSE_FAILURE_MESSAGE);
        }
        Self::network(path, error)
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16());
        self.status_text = status.canonical_reason().map(str::to_string);
        self
    }

    /// Turn a rejected response into an auth failure, keeping its status and
    /// body so hooks still see what the server said.
    pub fn into_auth(self, kind: AuthErrorKind) -> Self {
        let message = if self.message.is_empty() {
            SESSION_EXPIRED_MESSAGE.to_string()
        } else {
            self.message
        };
        Self {
            kind: ErrorKind::Auth(kind),
            message,
            status: self.status.or(Some(401)),
            ..self
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// HTTP 401 that has not been through session recovery yet.
    pub fn is_unauthorized(&self) -> bool {
        self.kind == ErrorKind::HttpStatus && self.status == Some(401)
    }

    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::Abort
    }

    /// Whether the generic retry loop may try again.
    ///
    /// Every failure spends retry budget except cancellation, auth failures,
    /// and a 401, which belongs to session recovery.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Network | ErrorKind::Timeout | ErrorKind::Decode | ErrorKind::DomainCode => {
                true
            }
            ErrorKind::HttpStatus => !self.is_unauthorized(),
            ErrorKind::Abort | ErrorKind::Auth(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RequestError>;
