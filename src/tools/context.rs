//! Per-invocation tool context
//!
//! The executor binds one [`ToolContext`] per invocation: the session view,
//! the workspace jail, the shared subsystems, a deadline, the cancellation
//! token, and the progress sink. Tools receive everything through the
//! context; nothing is reached through globals.

use super::progress::{ProgressEvent, ProgressSink};
use crate::common::{CommandRunner, Jail};
use crate::config::Config;
use crate::error::{AssistError, Result};
use crate::policy::PolicyEngine;
use crate::sampling::SamplingClient;
use crate::session::SessionView;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct ToolContext {
    session: Option<SessionView>,
    jail: Option<Jail>,
    pub runner: Arc<CommandRunner>,
    pub policy: Arc<PolicyEngine>,
    pub sampling: Arc<SamplingClient>,
    pub config: Arc<Config>,
    cancel: CancellationToken,
    deadline: Instant,
    progress_sink: Arc<dyn ProgressSink>,
    progress_token: Value,
}

impl ToolContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Option<SessionView>,
        jail: Option<Jail>,
        runner: Arc<CommandRunner>,
        policy: Arc<PolicyEngine>,
        sampling: Arc<SamplingClient>,
        config: Arc<Config>,
        cancel: CancellationToken,
        deadline: Instant,
        progress_sink: Arc<dyn ProgressSink>,
        progress_token: Value,
    ) -> Self {
        Self {
            session,
            jail,
            runner,
            policy,
            sampling,
            config,
            cancel,
            deadline,
            progress_token,
            progress_sink,
        }
    }

    /// The bound session; session-requiring tools are always given one.
    pub fn session(&self) -> Result<&SessionView> {
        self.session
            .as_ref()
            .ok_or_else(|| AssistError::precondition_failed("tool requires a session"))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.session_id())
    }

    /// The jail rooted at this session's workspace.
    pub fn jail(&self) -> Result<&Jail> {
        self.jail
            .as_ref()
            .ok_or_else(|| AssistError::precondition_failed("tool requires a workspace"))
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Error out if this invocation has been cancelled.
    ///
    /// Checked at every suspension point so a cancelled tool stops at its
    /// next boundary and never writes its artifact.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(AssistError::cancelled("invocation cancelled by caller"))
        } else {
            Ok(())
        }
    }

    /// Budget left before this invocation's deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Emit one progress tick.
    pub fn progress(&self, step: u32, total: u32, status: &str, message: &str) {
        self.progress_sink.emit(ProgressEvent::new(
            self.progress_token.clone(),
            step,
            total,
            status,
            message,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::session::SessionManager;
    use crate::store::KvStore;
    use crate::tools::progress::RecordingProgressSink;
    use serde_json::json;
    use tempfile::TempDir;

    async fn context(dir: &TempDir) -> (ToolContext, Arc<RecordingProgressSink>) {
        let config = SessionConfig {
            workspace_root: dir.path().to_path_buf(),
            ..SessionConfig::default()
        };
        let manager = SessionManager::new(config, KvStore::temporary().unwrap()).unwrap();
        let id = manager.create(Value::Null).await.unwrap();
        let view = manager.get(&id).unwrap();
        let jail = Jail::new(view.workspace()).unwrap();
        let sink = RecordingProgressSink::new();
        let ctx = ToolContext::new(
            Some(view),
            Some(jail),
            Arc::new(CommandRunner::new()),
            Arc::new(PolicyEngine::empty()),
            Arc::new(SamplingClient::disconnected()),
            Arc::new(Config::default()),
            CancellationToken::new(),
            Instant::now() + Duration::from_secs(30),
            sink.clone(),
            json!("test-token"),
        );
        (ctx, sink)
    }

    #[tokio::test]
    async fn progress_flows_to_sink() {
        let dir = TempDir::new().unwrap();
        let (ctx, sink) = context(&dir).await;
        ctx.progress(1, 3, "running", "first");
        ctx.progress(2, 3, "running", "second");
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].token, json!("test-token"));
        assert_eq!(events[1].step, 2);
    }

    #[tokio::test]
    async fn cancellation_check() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir).await;
        assert!(ctx.check_cancelled().is_ok());
        ctx.cancel_token().cancel();
        let err = ctx.check_cancelled().unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Cancelled);
    }

    #[tokio::test]
    async fn remaining_budget_shrinks() {
        let dir = TempDir::new().unwrap();
        let (ctx, _) = context(&dir).await;
        let first = ctx.remaining();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(ctx.remaining() < first);
    }
}
