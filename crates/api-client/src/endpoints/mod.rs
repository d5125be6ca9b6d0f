//! Typed wrappers for the backend's auth and AI endpoints

mod ai;
mod auth;

pub use ai::{AiApi, DEFAULT_MAX_TOKENS, DEFAULT_MODEL, DEFAULT_TEMPERATURE, GenerateParams, GenerateResponse, TokenUsage};
pub use auth::{
    AuthApi, AuthResponse, LoginParams, LogoutResponse, OAuthLoginParams, OAuthProvider,
    SignupParams, User,
};

use serde::Serialize;

use crate::error::RequestError;
use crate::request::Params;

/// Parameters from a typed request struct.
fn encode<T: Serialize>(value: &T, path: &str) -> Result<Params, RequestError> {
    Params::from_serialize(value)
        .map_err(|e| RequestError::decode(path, format!("failed to encode request: {e}")))
}
