//! Language-model generation client.
//!
//! [`GenerationClient`] owns the conversation for one session and talks to a
//! [`GenerationProvider`]. Replies are turned into a [`GeneratedTestSuite`]
//! by the assembler.

mod assembler;
mod client;
mod provider;
mod session;
mod types;


pub use assembler::{assemble, GeneratedTestCase, GeneratedTestSuite};
pub use client::LlmClient;
pub use provider::{resolve_provider, GenerationProvider, UnlinkedProvider};
pub use session::GenerationClient;
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatHistory, ChatMessage, ChatRole, Choice,
    Usage,
};
