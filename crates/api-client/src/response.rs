//! Response classification
//!
//! Every attempt's HTTP response passes through `intercept()`:
//! - status outside 200..400 becomes an `HttpStatus` error whose message comes
//!   from the JSON body's `message`, the plain-text body, or the status table
//! - a success with a non-JSON content type is returned raw, undecoded
//! - a JSON success whose envelope `code` signals failure becomes a
//!   `DomainCode` error, even at HTTP 200

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::de::DeserializeOwned;
use serde_json::Value;

use common::ApiResponse;

use crate::error::{RequestError, Result};
use crate::messages::{DOMAIN_FAILURE_MESSAGE, PARSE_FAILURE_MESSAGE, http_error_message};

/// Undecoded successful response (files, HTML, plain text).
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl RawResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Outcome of a successful attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Envelope { status: u16, body: Value },
    Raw(RawResponse),
}

impl Reply {
    /// Decode the envelope into the caller's `data` type.
    pub fn into_envelope<T: DeserializeOwned>(self, path: &str) -> Result<ApiResponse<T>> {
        match self {
            Reply::Envelope { body, .. } => serde_json::from_value(body).map_err(|e| {
                tracing::debug!(path, error = %e, "envelope does not match the expected shape");
                RequestError::decode(path, PARSE_FAILURE_MESSAGE)
            }),
            Reply::Raw(raw) => Err(RequestError::decode(
                path,
                format!(
                    "expected a JSON response, got {}",
                    raw.content_type.as_deref().unwrap_or("no content type")
                ),
            )),
        }
    }

    pub fn into_raw(self) -> RawResponse {
        match self {
            Reply::Raw(raw) => raw,
            Reply::Envelope { status, body } => RawResponse {
                status,
                content_type: Some(crate::request::JSON_CONTENT_TYPE.to_string()),
                body: Bytes::from(body.to_string()),
            },
        }
    }
}

/// Success band for the interceptor: 2xx and 3xx.
pub fn is_accepted(status: StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

fn is_json(content_type: Option<&str>) -> bool {
    content_type.is_some_and(|ct| {
        let essence = ct.split(';').next().unwrap_or_default().trim();
        essence.eq_ignore_ascii_case("application/json") || essence.ends_with("+json")
    })
}

fn content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Classify one HTTP response.
pub async fn intercept(response: reqwest::Response, path: &str) -> Result<Reply> {
    let status = response.status();
    if !is_accepted(status) {
        return Err(classify_failure(response, path).await);
    }

    let content_type = content_type(&response);
    let body = response
        .bytes()
        .await
        .map_err(|e| RequestError::from_transport(path, &e))?;

    // A declared non-JSON type is returned as-is; an undeclared one is
    // still expected to be the envelope.
    if content_type.is_some() && !is_json(content_type.as_deref()) {
        return Ok(Reply::Raw(RawResponse {
            status: status.as_u16(),
            content_type,
            body,
        }));
    }

    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        tracing::debug!(path, error = %e, "response body is not JSON");
        RequestError::decode(path, PARSE_FAILURE_MESSAGE).with_status(status)
    })?;

    if let Some(failure) = common::domain_failure(&value) {
        let message = failure
            .message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DOMAIN_FAILURE_MESSAGE.to_string());
        return Err(RequestError::domain(path, status, message, value));
    }

    Ok(Reply::Envelope {
        status: status.as_u16(),
        body: value,
    })
}

/// Build the `HttpStatus` error for a response outside the success band.
pub async fn classify_failure(response: reqwest::Response, path: &str) -> RequestError {
    let status = response.status();
    let json_body = is_json(content_type(&response).as_deref());
    let text = response.text().await.unwrap_or_default();

    let mut payload = None;
    let mut message = None;
    if json_body {
        if let Ok(value) = serde_json::from_str::<Value>(&text) {
            message = value
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .map(str::to_string);
            payload = Some(value);
        }
    } else if !text.trim().is_empty() {
        message = Some(text.trim().to_string());
    }

    let message = message.unwrap_or_else(|| http_error_message(status));
    RequestError::http_status(path, status, message, payload)
}
