use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::report::PassingTests;

/// Prefix of every session result directory.
pub const RESULT_DIR_PREFIX: &str = "test_gen_result_";

/// Lifecycle of one generation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    ContextSelected,
    PromptBuilt,
    Requested,
    Assembled,
    Failed,
    Compiled,
    Executed,
    Collected,
    Reported,
}

impl SessionState {
    /// Stable name used in logs and storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::ContextSelected => "context_selected",
            SessionState::PromptBuilt => "prompt_built",
            SessionState::Requested => "requested",
            SessionState::Assembled => "assembled",
            SessionState::Failed => "failed",
            SessionState::Compiled => "compiled",
            SessionState::Executed => "executed",
            SessionState::Collected => "collected",
            SessionState::Reported => "reported",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Reported)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation shared between the worker and the caller.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives human-readable progress text.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

/// Progress sink that writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, message: &str) {
        info!(progress = %message, "Progress");
    }
}

/// State owned by one generation session.
pub struct SessionContext {
    id: Uuid,
    result_dir: PathBuf,
    state: SessionState,
    passing: PassingTests,
    cancel: CancellationFlag,
    progress: Arc<dyn ProgressSink>,
}

impl SessionContext {
    /// Create a session with a fresh id and result directory under `results_root`.
    pub fn new(
        results_root: &Path,
        cancel: CancellationFlag,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let id = Uuid::new_v4();
        let result_dir = results_root.join(format!("{}{}", RESULT_DIR_PREFIX, id));
        Self {
            id,
            result_dir,
            state: SessionState::Idle,
            passing: PassingTests::new(),
            cancel,
            progress,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn result_dir(&self) -> &Path {
        &self.result_dir
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`; ignored once the session is terminal.
    pub fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            warn!(
                session_id = %self.id,
                from = %self.state,
                to = %next,
                "Ignoring transition out of a terminal state"
            );
            return;
        }
        debug!(session_id = %self.id, from = %self.state, to = %next, "Session state changed");
        self.state = next;
    }

    pub fn passing(&self) -> &PassingTests {
        &self.passing
    }

    pub fn passing_mut(&mut self) -> &mut PassingTests {
        &mut self.passing
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Forward a progress message to the sink.
    pub fn progress(&self, message: &str) {
        self.progress.report(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_dir_is_unique_per_session() {
        let root = Path::new("/tmp/llm-testgen-results");
        let a = SessionContext::new(root, CancellationFlag::new(), Arc::new(LogProgress));
        let b = SessionContext::new(root, CancellationFlag::new(), Arc::new(LogProgress));

        assert_ne!(a.result_dir(), b.result_dir());
        let name = a.result_dir().file_name().unwrap().to_string_lossy().to_string();
        assert_eq!(name, format!("test_gen_result_{}", a.id()));
    }

    #[test]
    fn test_failed_is_terminal() {
        let mut session =
            SessionContext::new(Path::new("/tmp"), CancellationFlag::new(), Arc::new(LogProgress));
        session.transition(SessionState::ContextSelected);
        session.transition(SessionState::Failed);
        session.transition(SessionState::Compiled);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[test]
    fn test_cancellation_is_shared() {
        let flag = CancellationFlag::new();
        let session = SessionContext::new(Path::new("/tmp"), flag.clone(), Arc::new(LogProgress));
        assert!(!session.is_cancelled());
        flag.cancel();
        assert!(session.is_cancelled());
    }
}
