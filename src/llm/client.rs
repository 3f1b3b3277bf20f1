use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::provider::GenerationProvider;
use super::types::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use crate::config::{LlmConfig, RequestConfig};
use crate::error::{LlmError, LlmResult};

/// Client for an OpenAI-compatible chat-completions API
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    base_url: String,
    model: String,
    request_config: RequestConfig,
}

impl LlmClient {
    /// Provider name used in user-facing messages
    pub const PROVIDER_NAME: &'static str = "OpenAI";

    /// Create a new client
    pub fn new(config: &LlmConfig, request_config: RequestConfig) -> LlmResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(|e| LlmError::Transport {
                status: None,
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            request_config,
        })
    }

    /// Send the conversation and return the first completion text
    pub async fn complete(&self, messages: &[ChatMessage], api_key: &str) -> LlmResult<String> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %self.model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying generation request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();

            match self.execute_request(&url, messages, api_key).await {
                Ok(completion) => {
                    info!(
                        model = %self.model,
                        latency_ms = start.elapsed().as_millis(),
                        chars = completion.len(),
                        "Generation request succeeded"
                    );
                    return Ok(completion);
                }
                Err(e) => {
                    error!(
                        model = %self.model,
                        error = %e,
                        kind = e.kind(),
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Generation request failed"
                    );
                    // A rejected credential will not get better with retries
                    if e.is_terminal() {
                        return Err(e);
                    }
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(last_error.unwrap_or_else(|| LlmError::Transport {
            status: None,
            message: "Unknown error".to_string(),
        }))
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        messages: &[ChatMessage],
        api_key: &str,
    ) -> LlmResult<String> {
        debug!(
            model = %self.model,
            messages = messages.len(),
            "Calling chat-completions endpoint"
        );

        let request = ChatCompletionRequest::new(&self.model, messages);

        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Transport {
                        status: None,
                        message: format!(
                            "Request timeout after {}ms",
                            self.request_config.timeout_ms
                        ),
                    }
                } else {
                    LlmError::Transport {
                        status: None,
                        message: format!("HTTP error: {}", e),
                    }
                }
            })?;

        let status = response.status();

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(LlmError::Auth {
                provider: Self::PROVIDER_NAME.to_string(),
            });
        }

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport {
                status: Some(status.as_u16()),
                message: format!("API error: {} - {}", status.as_u16(), error_body),
            });
        }

        let completion: ChatCompletionResponse =
            response.json().await.map_err(|e| LlmError::Transport {
                status: Some(status.as_u16()),
                message: format!("Failed to parse response: {}", e),
            })?;

        completion
            .completion()
            .map(str::to_string)
            .ok_or_else(|| LlmError::Transport {
                status: Some(status.as_u16()),
                message: "Response contained no choices".to_string(),
            })
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl GenerationProvider for LlmClient {
    fn name(&self) -> &str {
        Self::PROVIDER_NAME
    }

    async fn send(&self, history: &[ChatMessage], credential: &str) -> LlmResult<String> {
        self.complete(history, credential).await
    }
}
