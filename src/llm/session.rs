use std::sync::Arc;

use tracing::{debug, info, warn};

use super::assembler::{assemble, GeneratedTestSuite};
use super::provider::GenerationProvider;
use super::types::{ChatHistory, ChatMessage};
use crate::error::{LlmError, LlmResult};
use crate::prompts::SYSTEM_PROMPT;

/// Conversation with one provider for one generation session.
///
/// The history only grows. Once the provider reports an unavailable feature
/// or a rejected credential the client is closed and every later request
/// returns that error without touching the history.
pub struct GenerationClient {
    provider: Arc<dyn GenerationProvider>,
    credential: String,
    history: ChatHistory,
    closed_by: Option<LlmError>,
}

impl GenerationClient {
    /// Start a conversation seeded with the system prompt.
    pub fn new(provider: Arc<dyn GenerationProvider>, credential: impl Into<String>) -> Self {
        let mut history = ChatHistory::new();
        history.push(ChatMessage::system(SYSTEM_PROMPT));
        Self {
            provider,
            credential: credential.into(),
            history,
            closed_by: None,
        }
    }

    /// Send `prompt` as the next user turn and assemble the reply.
    pub async fn request(&mut self, prompt: &str, package: &str) -> LlmResult<GeneratedTestSuite> {
        if let Some(err) = &self.closed_by {
            warn!(provider = %self.provider.name(), kind = err.kind(), "Request refused, session closed");
            return Err(err.clone());
        }

        self.history.push(ChatMessage::user(prompt));
        debug!(
            provider = %self.provider.name(),
            turns = self.history.len(),
            "Sending generation request"
        );

        let raw = match self.provider.send(self.history.messages(), &self.credential).await {
            Ok(raw) => raw,
            Err(err) => {
                if err.is_terminal() {
                    info!(provider = %self.provider.name(), kind = err.kind(), "Closing generation session");
                    self.closed_by = Some(err.clone());
                }
                return Err(err);
            }
        };

        self.history.push(ChatMessage::assistant(raw.clone()));
        assemble(&raw, package)
    }

    /// Conversation so far.
    pub fn history(&self) -> &ChatHistory {
        &self.history
    }

    /// Whether a terminal provider error ended the conversation.
    pub fn is_closed(&self) -> bool {
        self.closed_by.is_some()
    }

    /// Name of the underlying provider.
    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }
}
