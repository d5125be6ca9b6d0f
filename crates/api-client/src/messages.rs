//! User-facing failure messages

use reqwest::StatusCode;

pub const NETWORK_ERROR_MESSAGE: &str = "Network connection error, please check your network";
pub const CANCELED_MESSAGE: &str = "Request was canceled";
pub const FALLBACK_MESSAGE: &str = "Request failed, please try again later";
pub const PARSE_FAILURE_MESSAGE: &str = "Failed to parse response data";
pub const DOMAIN_FAILURE_MESSAGE: &str = "Request failed";
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please sign in again";
pub const REFRESH_FAILED_MESSAGE: &str = "Session renewal failed, please sign in again";

/// Fixed message for the statuses the backend documents.
pub fn status_message(status: u16) -> Option<&'static str> {
    match status {
        400 => Some("Invalid request parameters"),
        401 => Some("Unauthorized, please sign in again"),
        403 => Some("Access denied"),
        404 => Some("Requested resource not found"),
        418 => Some("I'm a teapot"),
        500 => Some("Internal server error"),
        _ => None,
    }
}

/// Message for an error status whose body carried none.
pub fn http_error_message(status: StatusCode) -> String {
    match status_message(status.as_u16()) {
        Some(message) => message.to_string(),
        None => format!(
            "HTTP error: {} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        )
        .trim_end()
        .to_string(),
    }
}
