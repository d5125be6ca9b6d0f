//! Auth endpoint paths and redirect conventions
//!
//! Paths are relative to the API base URL (`{origin}/api`).

/// Renewal endpoint, `POST {base}/auth/refresh` with `{"refresh_token": ...}`
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Application entry point for authentication
pub const LOGIN_PATH: &str = "/login";

/// Query parameter carrying the path to return to after login
pub const REDIRECT_PARAM: &str = "redirect_to";

/// Values a broken storage layer writes instead of a real token
pub const UNSET_TOKEN_MARKERS: &[&str] = &["undefined", "null"];
