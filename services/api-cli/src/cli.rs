//! Command-line arguments
//!
//! Global flags may appear before or after the subcommand.

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

/// Call the API from the command line, keeping the session between runs
#[derive(Debug, PartialEq, Parser)]
#[command(name = "apictl", version)]
pub struct Cli {
    /// Config file (default: $CONFIG_PATH, then apictl.toml)
    #[arg(long = "config", global = true)]
    pub config_path: Option<String>,
    /// Print Prometheus metrics to stderr when done
    #[arg(long, global = true)]
    pub metrics: bool,
    /// Log as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, PartialEq, Subcommand)]
pub enum Command {
    Get(RequestArgs),
    Post(RequestArgs),
    Put(RequestArgs),
    Patch(RequestArgs),
    Delete(RequestArgs),
    /// Sign in and store the session
    Login { email: String, password: String },
    /// Create an account and store the session
    Signup {
        email: String,
        password: String,
        name: Option<String>,
    },
    /// Sign out and clear the stored session
    Logout,
    /// Generate text from a prompt
    Generate {
        /// Print chunks as they arrive
        #[arg(long)]
        stream: bool,
        #[arg(long)]
        model: Option<String>,
        /// Prompt words, joined with spaces
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,
    },
}

#[derive(Debug, PartialEq, Args)]
pub struct RequestArgs {
    /// Path below the API base URL
    pub path: String,
    /// `key=value` parameters; values that parse as JSON are sent as JSON
    #[arg(value_parser = parse_param)]
    pub params: Vec<(String, Value)>,
    /// Write the response body as received
    #[arg(long)]
    pub raw: bool,
}

fn parse_param(pair: &str) -> Result<(String, Value), String> {
    let (key, value) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got: {pair}"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in: {pair}"));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}
