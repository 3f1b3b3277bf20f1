//! Provider boundary for generation requests.
//!
//! The pipeline only talks to [`GenerationProvider`]. The HTTP client is the
//! default implementation; the licensed provider is not linked into this
//! build and resolves to [`UnlinkedProvider`], which reports itself as
//! unavailable on every call.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::client::LlmClient;
use super::types::ChatMessage;
use crate::config::{LlmConfig, ProviderKind, RequestConfig};
use crate::error::{LlmError, LlmResult};

/// A chat-style generation backend.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Human-readable provider name used in error messages.
    fn name(&self) -> &str;

    /// Send the whole ordered conversation and return the raw response text.
    async fn send(&self, history: &[ChatMessage], credential: &str) -> LlmResult<String>;
}

/// Stand-in for a provider that is not part of this build.
#[derive(Debug, Clone)]
pub struct UnlinkedProvider {
    name: String,
}

impl UnlinkedProvider {
    /// Create a stub for the named provider.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl GenerationProvider for UnlinkedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, _history: &[ChatMessage], _credential: &str) -> LlmResult<String> {
        Err(LlmError::Unavailable {
            provider: self.name.clone(),
        })
    }
}

/// Resolve the configured provider.
pub fn resolve_provider(
    config: &LlmConfig,
    request_config: RequestConfig,
) -> LlmResult<Arc<dyn GenerationProvider>> {
    match config.provider {
        ProviderKind::Default => {
            let client = LlmClient::new(config, request_config)?;
            info!(base_url = %client.base_url(), model = %config.model, "Default provider initialized");
            Ok(Arc::new(client))
        }
        ProviderKind::Premium => {
            info!("Premium provider is not linked into this build");
            Ok(Arc::new(UnlinkedProvider::new("Premium")))
        }
    }
}
