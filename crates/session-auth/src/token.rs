//! Session renewal
//!
//! One POST to `{base}/auth/refresh` with `{"refresh_token": ...}`. The
//! answer is the usual envelope with `data: {token, refresh_token,
//! expires_in?, refresh_expires_in?}`. Any non-2xx status, a failing
//! envelope `code`, or a missing access token is a renewal failure.
//!
//! This call is deliberately outside the client's retry wrapper: the caller
//! (the refresh coordinator) decides what a failure means.

use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::{TokenGrant, is_valid_token};
use crate::error::{Error, Result};

/// `data` payload of a successful renewal.
///
/// `expires_in` and `refresh_expires_in` are deltas in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
}

impl From<TokenResponse> for TokenGrant {
    fn from(response: TokenResponse) -> Self {
        TokenGrant {
            access_token: response.token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            refresh_expires_in: response.refresh_expires_in,
        }
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Exchange a refresh token for a new token pair.
///
/// `headers` come from the client's request builder so the renewal call
/// carries the same ambient headers as every other call.
pub async fn refresh_session(
    client: &reqwest::Client,
    url: &str,
    refresh: &str,
    headers: HeaderMap,
    timeout: Duration,
) -> Result<TokenResponse> {
    let response = client
        .post(url)
        .headers(headers)
        .timeout(timeout)
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403 means the refresh token is revoked or invalid
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "refresh endpoint returned {status}: {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "refresh endpoint returned {status}: {body}"
        )));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid refresh response: {e}")))?;

    if let Some(failure) = common::domain_failure(&body) {
        return Err(Error::InvalidCredentials(failure.message.unwrap_or_else(
            || format!("refresh rejected with code {}", failure.code),
        )));
    }

    let data = body.get("data").cloned().unwrap_or_default();
    let token: TokenResponse = serde_json::from_value(data)
        .map_err(|e| Error::TokenExchange(format!("invalid refresh payload: {e}")))?;

    if !is_valid_token(&token.token) {
        return Err(Error::TokenExchange(
            "refresh response carried no access token".into(),
        ));
    }

    debug!(
        rotated_refresh = token.refresh_token.is_some(),
        expires_in = ?token.expires_in,
        "refresh endpoint issued new token"
    );
    Ok(token)
}
