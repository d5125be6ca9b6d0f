//! apictl
//!
//! Command-line front end for the API client:
//! 1. Loads `[client]` and `[session]` settings from TOML (or defaults)
//! 2. Keeps the session tokens in a JSON credentials file between runs
//! 3. Runs one call through the client pipeline (retries, session renewal)
//! 4. Prints the result as JSON, or the raw body / stream text

mod cli;
mod config;
mod metrics;

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use api_client::endpoints::{GenerateParams, LoginParams, SignupParams};
use api_client::{ApiClient, CancellationToken, Params, RequestError, RequestOptions, RequestResult};
use clap::Parser;
use reqwest::Method;
use serde::Serialize;
use serde_json::{Value, json};
use session_auth::FileCredentialStore;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command, RequestArgs};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_json);
    let show_metrics = cli.metrics;

    let prometheus = metrics::install_recorder()?;

    let config_path = Config::resolve_path(cli.config_path.as_deref());
    debug!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    let credentials_file = config.session.credentials_file.clone();
    if let Some(parent) = credentials_file.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = FileCredentialStore::load(credentials_file.clone())
        .await
        .with_context(|| format!("failed to read credentials from {}", credentials_file.display()))?;

    info!(
        base_url = %config.client.base_url,
        timeout_ms = config.client.timeout_ms,
        max_retries = config.client.max_retries,
        "client configured"
    );

    let client = ApiClient::builder(config.client)
        .store(Arc::new(store))
        .build();

    // Ctrl-C cancels whatever call is in flight
    let cancel = ApiClient::cancel_token();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, canceling");
            on_signal.cancel();
        }
    });

    let outcome = run(&client, cli, cancel).await;

    if show_metrics {
        eprintln!("{}", prometheus.render());
    }

    outcome
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(client: &ApiClient, cli: Cli, cancel: CancellationToken) -> Result<()> {
    match cli.command {
        Command::Get(args) => request(client, Method::GET, args, cancel).await,
        Command::Post(args) => request(client, Method::POST, args, cancel).await,
        Command::Put(args) => request(client, Method::PUT, args, cancel).await,
        Command::Patch(args) => request(client, Method::PATCH, args, cancel).await,
        Command::Delete(args) => request(client, Method::DELETE, args, cancel).await,
        Command::Login { email, password } => {
            let reply = settled(
                client
                    .auth()
                    .login(&LoginParams { email, password }, None)
                    .await,
            )?;
            print_json(&json!({
                "message": reply.message,
                "user": {"id": reply.data.user.id, "email": reply.data.user.email, "name": reply.data.user.name},
            }))
        }
        Command::Signup {
            email,
            password,
            name,
        } => {
            let reply = settled(
                client
                    .auth()
                    .signup(
                        &SignupParams {
                            email,
                            password,
                            name,
                        },
                        None,
                    )
                    .await,
            )?;
            print_json(&json!({
                "message": reply.message,
                "user": {"id": reply.data.user.id, "email": reply.data.user.email, "name": reply.data.user.name},
            }))
        }
        Command::Logout => {
            // Local credentials are cleared even when the server call fails
            let result = client.auth().logout(None).await;
            print_json(&json!({"signed_out": true, "server_ack": result.is_ok()}))
        }
        Command::Generate {
            prompt,
            model,
            stream,
        } => {
            let params = GenerateParams {
                model,
                ..GenerateParams::new(prompt.join(" "))
            };
            if stream {
                generate_stream(client, &params, cancel).await
            } else {
                let reply = settled(client.ai().generate(&params, None).await)?;
                print_json(&json!({
                    "content": reply.data.content,
                    "model": reply.data.model,
                    "usage": reply.data.usage.map(|u| json!({
                        "promptTokens": u.prompt_tokens,
                        "completionTokens": u.completion_tokens,
                        "totalTokens": u.total_tokens,
                    })),
                }))
            }
        }
    }
}

async fn request(
    client: &ApiClient,
    method: Method,
    args: RequestArgs,
    cancel: CancellationToken,
) -> Result<()> {
    let options = RequestOptions::new()
        .params(args.params.into_iter().collect::<Params>())
        .cancel_with(cancel);
    if args.raw {
        let response = settled(client.request_raw(method, &args.path, options).await)?;
        std::io::stdout()
            .write_all(&response.body)
            .context("failed to write response body")?;
        Ok(())
    } else {
        print_json(&settled(client.request::<Value>(method, &args.path, options).await)?)
    }
}

async fn generate_stream(
    client: &ApiClient,
    params: &GenerateParams,
    cancel: CancellationToken,
) -> Result<()> {
    let failure: Arc<Mutex<Option<RequestError>>> = Arc::default();
    let sink = failure.clone();

    let session = client.ai().generate_stream(
        params,
        |chunk| {
            let mut stdout = std::io::stdout();
            let _ = stdout.write_all(chunk.as_bytes());
            let _ = stdout.flush();
        },
        move |error| {
            *sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
        },
        None,
    );

    let on_cancel = session.cancel_token();
    tokio::spawn(async move {
        cancel.cancelled().await;
        on_cancel.cancel();
    });
    session.finished().await;
    println!();

    if let Some(error) = failure.lock().unwrap_or_else(PoisonError::into_inner).take() {
        bail!("stream failed: {error}");
    }
    Ok(())
}

/// Turn a call result into `anyhow`, keeping the HTTP status in the message.
fn settled<T>(result: RequestResult<T>) -> Result<T> {
    let status = result.status;
    result.into_result().map_err(|message| match status {
        Some(status) => anyhow::anyhow!("{message} (status {status})"),
        None => anyhow::anyhow!(message),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode output")?;
    println!("{text}");
    Ok(())
}
