//! Session-aware request layer for the backend API
//!
//! Issues requests against `{origin}/api`, renews an expired session
//! transparently, retries transient failures, classifies every failure into
//! one taxonomy and consumes the server-sent event stream used for
//! incremental content.
//!
//! Call flow:
//! 1. A verb (`get`, `post`, ...) builds the transport request once (`request`)
//! 2. Each attempt sends it and classifies the answer (`response`)
//! 3. Transient failures are retried with a fixed delay (`retry`)
//! 4. A 401 is handed to the single-flight renewal state machine (`refresh`),
//!    which replays the call exactly once after a successful renewal
//! 5. Failures run through the caller's hooks and become the uniform
//!    `{data, error, status}` result (`dispatch`)
//!
//! Streams (`stream`) share the request builder but bypass retry and renewal.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod endpoints;
pub mod error;
mod executor;
pub mod messages;
pub mod metrics;
pub mod refresh;
pub mod request;
pub mod response;
pub mod retry;
pub mod stream;

#[cfg(test)]
mod test_support;

pub use client::{ApiClient, ApiClientBuilder, RequestResult};
pub use common::ApiResponse;
pub use config::ClientConfig;
pub use dispatch::{ErrorHandler, ErrorHooks};
pub use endpoints::{AiApi, AuthApi};
pub use error::{AuthErrorKind, ErrorCategory, ErrorKind, RequestError, Result};
pub use refresh::RefreshSnapshot;
pub use request::{Params, Payload, RequestOptions};
pub use response::RawResponse;
pub use retry::RetryPolicy;
pub use stream::StreamSession;
pub use tokio_util::sync::CancellationToken;
