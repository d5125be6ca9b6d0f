//! Session credentials for the API client
//!
//! Owns everything about the access/refresh credential pair that is not the
//! request pipeline itself:
//! 1. `Credential` and the `CredentialStore` contract (get / set / clear)
//! 2. Store implementations: in-memory, JSON file, and a no-op store for
//!    environments without persistent storage
//! 3. `token::refresh_session()`, the single call to the renewal endpoint
//! 4. `Navigator` and the login redirect target used when a session cannot
//!    be recovered

pub mod constants;
pub mod credentials;
pub mod error;
pub mod redirect;
pub mod token;

pub use constants::*;
pub use credentials::{
    Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, NoopCredentialStore,
    StoreFuture, TokenGrant, is_valid_token, now_millis,
};
pub use error::{Error, Result};
pub use redirect::{Navigator, TracingNavigator, login_redirect_target};
pub use token::{TokenResponse, refresh_session};
