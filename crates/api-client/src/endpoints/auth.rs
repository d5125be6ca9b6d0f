//! `/auth/*`: sign-up, sign-in, OAuth sign-in, renewal and sign-out
//!
//! Successful sign-ins store the issued token pair; sign-out clears the
//! store whether or not the server call succeeded.

use std::fmt;

use common::ApiResponse;
use serde::{Deserialize, Serialize};
use session_auth::{TokenGrant, TokenResponse, is_valid_token};
use tracing::{info, warn};

use super::encode;
use crate::client::{ApiClient, RequestResult};
use crate::dispatch::ErrorHandler;
use crate::request::{Params, RequestOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
}

impl OAuthProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
            OAuthProvider::Github => "github",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OAuthProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            "github" => Ok(OAuthProvider::Github),
            other => Err(format!("unknown OAuth provider: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupParams {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginParams {
    pub email: String,
    pub password: String,
}

/// Account data handed over by the OAuth provider.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthLoginParams {
    pub provider_account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub provider: Option<OAuthProvider>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LogoutResponse {
    pub success: bool,
}

pub struct AuthApi<'a> {
    client: &'a ApiClient,
}

impl ApiClient {
    pub fn auth(&self) -> AuthApi<'_> {
        AuthApi { client: self }
    }
}

fn options(params: Params, handler: Option<ErrorHandler>) -> RequestOptions {
    let options = RequestOptions::new().params(params);
    match handler {
        Some(handler) => options.on_error(handler),
        None => options,
    }
}

impl AuthApi<'_> {
    pub async fn signup(
        &self,
        params: &SignupParams,
        handler: Option<ErrorHandler>,
    ) -> RequestResult<ApiResponse<AuthResponse>> {
        self.sign_in("/auth/signup", params, handler).await
    }

    pub async fn login(
        &self,
        params: &LoginParams,
        handler: Option<ErrorHandler>,
    ) -> RequestResult<ApiResponse<AuthResponse>> {
        self.sign_in("/auth/login", params, handler).await
    }

    pub async fn oauth_login(
        &self,
        provider: OAuthProvider,
        params: &OAuthLoginParams,
        handler: Option<ErrorHandler>,
    ) -> RequestResult<ApiResponse<AuthResponse>> {
        self.sign_in(&format!("/auth/oauth/{provider}"), params, handler)
            .await
    }

    /// Explicit renewal call. Goes through the normal request pipeline and
    /// stores the result on success.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        handler: Option<ErrorHandler>,
    ) -> RequestResult<ApiResponse<TokenResponse>> {
        let path = self.client.config().refresh_path.clone();
        let params = Params::new().with("refresh_token", refresh_token);
        let result = self
            .client
            .post::<TokenResponse>(&path, options(params, handler))
            .await;
        if let Some(envelope) = &result.data {
            self.persist(TokenGrant::from(envelope.data.clone())).await;
        }
        result
    }

    /// Sign out on the server, then drop the local session regardless.
    pub async fn logout(&self, handler: Option<ErrorHandler>) -> RequestResult<ApiResponse<LogoutResponse>> {
        let result = self
            .client
            .post::<LogoutResponse>("/auth/logout", options(Params::new(), handler))
            .await;
        if let Err(e) = self.client.credentials().clear().await {
            warn!(error = %e, "failed to clear credentials on logout");
        }
        info!(server_ack = result.is_ok(), "signed out");
        result
    }

    async fn sign_in<P: Serialize>(
        &self,
        path: &str,
        params: &P,
        handler: Option<ErrorHandler>,
    ) -> RequestResult<ApiResponse<AuthResponse>> {
        let params = match encode(params, path) {
            Ok(params) => params,
            Err(error) => return ApiClient::settle(Err(error), handler.as_ref()),
        };
        let result = self
            .client
            .post::<AuthResponse>(path, options(params, handler))
            .await;
        if let Some(envelope) = &result.data {
            let auth = &envelope.data;
            if is_valid_token(&auth.token) && is_valid_token(&auth.refresh_token) {
                self.persist(TokenGrant::new(auth.token.clone(), auth.refresh_token.clone()))
                    .await;
                info!(user_id = auth.user.id, path, "signed in");
            } else {
                warn!(path, "sign-in response carried no usable token pair");
            }
        }
        result
    }

    async fn persist(&self, grant: TokenGrant) {
        if let Err(e) = self.client.credentials().set(grant).await {
            warn!(error = %e, "failed to store session tokens");
        }
    }
}
