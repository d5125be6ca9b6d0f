//! Server-sent event consumption
//!
//! A stream is one POST with `Accept: text/event-stream`, read line by line
//! as bytes arrive. Lines are reassembled across transport chunks. For each
//! `data:` line:
//! - `[DONE]` ends the stream
//! - a JSON object with a string `content` delivers that string
//! - a JSON string delivers itself
//! - anything that is not JSON is delivered verbatim unless blank
//!
//! Streams are neither retried nor routed through session renewal.
//! Cancelling a session stops delivery without calling the error callback.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use common::Secret;
use futures_util::StreamExt;
use reqwest::Method;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span};

use crate::client::{ApiClient, ClientInner};
use crate::dispatch::dispatch;
use crate::error::{RequestError, Result};
use crate::executor::resolve_token;
use crate::request::{PreparedRequest, RequestOptions, build_request, new_request_id};
use crate::response::classify_failure;

pub const DONE_SENTINEL: &str = "[DONE]";

/// Meaning of one `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamData {
    Chunk(String),
    Done,
    Skip,
}

pub fn decode_data(data: &str) -> StreamData {
    if data.trim() == DONE_SENTINEL {
        return StreamData::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(Value::Object(map)) => match map.get("content") {
            Some(Value::String(content)) if !content.is_empty() => {
                StreamData::Chunk(content.clone())
            }
            _ => StreamData::Skip,
        },
        Ok(Value::String(text)) => StreamData::Chunk(text),
        Ok(_) => StreamData::Skip,
        Err(_) if data.trim().is_empty() => StreamData::Skip,
        Err(_) => StreamData::Chunk(data.to_string()),
    }
}

/// Payload of a `data:` line, without the single optional leading space.
pub fn data_field(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("data:")?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

/// Reassembles lines from arbitrarily split byte chunks.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            lines.push(decode_line(&raw));
        }
        lines
    }

    /// Whatever is left once the body ends.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(decode_line(&rest))
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = raw.strip_suffix(b"\n").unwrap_or(raw);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    String::from_utf8_lossy(line).into_owned()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    /// Server sent the end sentinel
    Done,
    /// Body ended without the sentinel
    Closed,
    Canceled,
}

impl StreamEnd {
    fn label(self) -> &'static str {
        match self {
            StreamEnd::Done => "done",
            StreamEnd::Closed => "closed",
            StreamEnd::Canceled => "canceled",
        }
    }
}

/// Handle to a running stream.
///
/// Dropping the handle stops the stream. A token passed with
/// `RequestOptions::cancel_with` still cancels it, but the session only ever
/// cancels its own child of that token.
pub struct StreamSession {
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Stop delivery. No further chunks and no error callback after this.
    pub fn cancel(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the stream to end, fail, or observe cancellation.
    pub async fn finished(mut self) {
        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            tracing::warn!(error = %e, "stream task ended abnormally");
        }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        if self.task.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("stream handle dropped, canceling");
            self.cancel();
        }
    }
}

impl fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSession")
            .field("active", &self.is_active())
            .finish()
    }
}

impl ApiClient {
    /// POST `path` and deliver each event payload to `on_chunk`.
    ///
    /// `on_error` runs at most once, for failures other than cancellation.
    /// The options' error handler, if any, is dispatched as well.
    pub fn stream<C, E>(
        &self,
        path: &str,
        options: RequestOptions,
        on_chunk: C,
        on_error: E,
    ) -> StreamSession
    where
        C: FnMut(String) + Send + 'static,
        E: FnOnce(RequestError) + Send + 'static,
    {
        let config = self.config();
        let options = options.accept_event_stream();
        let request_id = new_request_id();
        let request = build_request(&config.base_url, Method::POST, path, &options, &request_id);
        let timeout = match options.timeout {
            Some(t) if t.is_zero() => None,
            Some(t) => Some(t),
            None => config.timeout(),
        };
        let cancel = options
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let active = Arc::new(AtomicBool::new(true));
        let span = info_span!("api_stream", path, request_id = %request_id);

        let task = tokio::spawn(
            run_stream(
                self.inner().clone(),
                request,
                path.to_string(),
                options,
                timeout,
                cancel.clone(),
                active.clone(),
                on_chunk,
                on_error,
            )
            .instrument(span),
        );

        StreamSession {
            cancel,
            active,
            task: Some(task),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_stream<C, E>(
    inner: Arc<ClientInner>,
    request: PreparedRequest,
    path: String,
    options: RequestOptions,
    timeout: Option<Duration>,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    mut on_chunk: C,
    on_error: E,
) where
    C: FnMut(String) + Send + 'static,
    E: FnOnce(RequestError) + Send + 'static,
{
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(StreamEnd::Canceled),
        result = consume(&inner, &request, &path, options.token.as_ref(), timeout, &mut on_chunk) => result,
    };
    active.store(false, Ordering::SeqCst);

    match outcome {
        Ok(end) => {
            crate::metrics::record_stream(end.label());
            debug!(outcome = end.label(), "stream finished");
        }
        Err(error) if error.is_abort() => {
            crate::metrics::record_stream(StreamEnd::Canceled.label());
            debug!("stream canceled");
        }
        Err(error) => {
            crate::metrics::record_stream(error.kind.label());
            dispatch(&error, options.error_handler.as_ref());
            on_error(error);
        }
    }
}

async fn consume<C: FnMut(String)>(
    inner: &ClientInner,
    request: &PreparedRequest,
    path: &str,
    token: Option<&Secret<String>>,
    timeout: Option<Duration>,
    on_chunk: &mut C,
) -> Result<StreamEnd> {
    let token = resolve_token(inner.store.as_ref(), token).await;
    let send = request.to_reqwest(&inner.http, token.as_deref()).send();
    let sent = match timeout {
        Some(limit) => tokio::time::timeout(limit, send)
            .await
            .map_err(|_| RequestError::timeout(path, limit))?,
        None => send.await,
    };
    let response = sent.map_err(|e| RequestError::from_transport(path, &e))?;
    if !response.status().is_success() {
        return Err(classify_failure(response, path).await);
    }

    let mut body = response.bytes_stream();
    let mut lines = LineBuffer::default();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| RequestError::from_transport(path, &e))?;
        for line in lines.push(&chunk) {
            if deliver(&line, on_chunk) {
                return Ok(StreamEnd::Done);
            }
        }
    }
    if let Some(line) = lines.finish()
        && deliver(&line, on_chunk)
    {
        return Ok(StreamEnd::Done);
    }
    Ok(StreamEnd::Closed)
}

/// Hand one line to the caller. Returns true at the end sentinel.
fn deliver<C: FnMut(String)>(line: &str, on_chunk: &mut C) -> bool {
    let Some(data) = data_field(line) else {
        return false;
    };
    match decode_data(data) {
        StreamData::Done => true,
        StreamData::Chunk(text) => {
            on_chunk(text);
            false
        }
        StreamData::Skip => false,
    }
}
