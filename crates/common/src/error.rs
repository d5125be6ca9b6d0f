//! Configuration-level error types

use thiserror::Error;

/// Errors raised while loading or validating configuration
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_reason() {
        let err = Error::Config("base_url must start with http".into());
        assert_eq!(
            err.to_string(),
            "Configuration error: base_url must start with http"
        );
    }

    #[test]
    fn toml_error_converts_with_question_mark() {
        fn parse(input: &str) -> Result<toml::Table> {
            Ok(toml::from_str(input)?)
        }

        let err = parse("not = = valid").unwrap_err();
        assert!(matches!(err, Error::Toml(_)), "got: {err:?}");
        assert!(err.to_string().starts_with("TOML parse error:"));
    }

    #[test]
    fn io_error_converts_with_question_mark() {
        fn read() -> Result<String> {
            Ok(std::fs::read_to_string("/nonexistent/apictl.toml")?)
        }

        let err = read().unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got: {err:?}");
    }
}
