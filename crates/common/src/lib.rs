//! Common types shared by the session-auth library, the API client and the CLI

mod envelope;
mod error;
mod secret;

pub use envelope::{ApiResponse, DomainFailure, domain_failure, is_success_code};
pub use error::{Error, Result};
pub use secret::Secret;
