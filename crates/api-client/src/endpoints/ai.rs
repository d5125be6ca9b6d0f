//! `/ai/generate`: one-shot and streamed text generation

use common::ApiResponse;
use serde::{Deserialize, Serialize};

use crate::client::{ApiClient, RequestResult};
use crate::dispatch::ErrorHandler;
use crate::error::RequestError;
use crate::request::{Params, RequestOptions};
use crate::stream::StreamSession;

pub const GENERATE_PATH: &str = "/ai/generate";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerateParams {
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u32>,
}

impl GenerateParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Request body with defaults filled in.
    fn to_params(&self, stream: bool) -> Params {
        Params::new()
            .with("prompt", self.prompt.as_str())
            .with("model", self.model.as_deref().unwrap_or(DEFAULT_MODEL))
            .with("temperature", self.temperature.unwrap_or(DEFAULT_TEMPERATURE))
            .with("maxTokens", self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS))
            .with("stream", stream)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

pub struct AiApi<'a> {
    client: &'a ApiClient,
}

impl ApiClient {
    pub fn ai(&self) -> AiApi<'_> {
        AiApi { client: self }
    }
}

impl AiApi<'_> {
    pub async fn generate(
        &self,
        params: &GenerateParams,
        handler: Option<ErrorHandler>,
    ) -> RequestResult<ApiResponse<GenerateResponse>> {
        let mut options = RequestOptions::new().params(params.to_params(false));
        options.error_handler = handler;
        self.client.post(GENERATE_PATH, options).await
    }

    /// Stream the completion chunk by chunk.
    pub fn generate_stream<C, E>(
        &self,
        params: &GenerateParams,
        on_chunk: C,
        on_error: E,
        handler: Option<ErrorHandler>,
    ) -> StreamSession
    where
        C: FnMut(String) + Send + 'static,
        E: FnOnce(RequestError) + Send + 'static,
    {
        let mut options = RequestOptions::new().params(params.to_params(true));
        options.error_handler = handler;
        self.client.stream(GENERATE_PATH, options, on_chunk, on_error)
    }
}
