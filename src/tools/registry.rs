//! Tool registry and executor
//!
//! Registration happens once at startup; duplicate names are a fatal
//! configuration error. Execution runs the full contract: input schema
//! validation, side-effect preflights, session binding with a per-session
//! ticket, deadline and cancellation enforcement, panic containment, and
//! error-taxonomy mapping. Nothing a tool does escapes the executor as a
//! panic or an untyped error.

use super::context::ToolContext;
use super::progress::{NullProgressSink, ProgressSink};
use super::{SideEffect, Tool, ToolDefinition};
use crate::common::{CommandRunner, Jail, schema};
use crate::config::Config;
use crate::error::{AssistError, Result};
use crate::policy::PolicyEngine;
use crate::sampling::SamplingClient;
use crate::session::SessionManager;
use futures_util::FutureExt;
use jsonschema::Validator;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How long a docker/kubectl reachability probe stays trusted.
const PROBE_TTL: Duration = Duration::from_secs(60);

struct RegisteredTool {
    tool: Box<dyn Tool>,
    definition: ToolDefinition,
    input_validator: Validator,
    output_validator: Option<Validator>,
}

/// The static tool table.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A duplicate name is a configuration error that must
    /// abort startup.
    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<()> {
        let definition = tool.definition();
        if self.tools.contains_key(definition.name) {
            return Err(AssistError::invalid_argument(format!(
                "duplicate tool name {}",
                definition.name
            )));
        }
        let input_validator = schema::compile(&definition.input_schema).map_err(|e| {
            AssistError::invalid_argument(format!(
                "tool {} has an invalid input schema: {}",
                definition.name, e
            ))
        })?;
        let output_validator = if definition.output_schema.is_null() {
            None
        } else {
            Some(schema::compile(&definition.output_schema).map_err(|e| {
                AssistError::invalid_argument(format!(
                    "tool {} has an invalid output schema: {}",
                    definition.name, e
                ))
            })?)
        };
        self.tools.insert(
            definition.name,
            RegisteredTool {
                tool,
                definition,
                input_validator,
                output_validator,
            },
        );
        Ok(())
    }

    /// All definitions, in name order.
    pub fn list(&self) -> Vec<&ToolDefinition> {
        self.tools.values().map(|t| &t.definition).collect()
    }

    pub fn describe(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name).map(|t| &t.definition)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Per-invocation options supplied by the front-end.
pub struct InvokeOptions {
    pub session_id: Option<String>,
    pub progress_token: Option<Value>,
    pub timeout: Option<Duration>,
    pub cancel: CancellationToken,
    pub progress_sink: Arc<dyn ProgressSink>,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            session_id: None,
            progress_token: None,
            timeout: None,
            cancel: CancellationToken::new(),
            progress_sink: Arc::new(NullProgressSink),
        }
    }
}

/// Executes registered tools under the runtime contract.
pub struct ToolExecutor {
    registry: ToolRegistry,
    sessions: Arc<SessionManager>,
    runner: Arc<CommandRunner>,
    policy: Arc<PolicyEngine>,
    sampling: Arc<SamplingClient>,
    config: Arc<Config>,
    started_at: Instant,
    docker_probe: parking_lot::Mutex<Option<(Instant, bool)>>,
    k8s_probe: parking_lot::Mutex<Option<(Instant, bool)>>,
}

impl ToolExecutor {
    pub fn new(
        registry: ToolRegistry,
        sessions: Arc<SessionManager>,
        runner: Arc<CommandRunner>,
        policy: Arc<PolicyEngine>,
        sampling: Arc<SamplingClient>,
        config: Arc<Config>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sessions,
            runner,
            policy,
            sampling,
            config,
            started_at: Instant::now(),
            docker_probe: parking_lot::Mutex::new(None),
            k8s_probe: parking_lot::Mutex::new(None),
        })
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The loaded prompt template store, for the discovery surface.
    pub fn sampling_templates(&self) -> &crate::sampling::TemplateStore {
        self.sampling.templates()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Invoke a tool by name with raw JSON input.
    ///
    /// Never panics and never returns an untyped error; every failure is an
    /// [`AssistError`] from the closed taxonomy.
    pub async fn invoke(&self, name: &str, raw_input: Value, opts: InvokeOptions) -> Result<Value> {
        let registered = self
            .registry
            .tools
            .get(name)
            .ok_or_else(|| {
                AssistError::not_found(format!("tool {} not found", name))
                    .with_hint("call tools/list for the available set")
            })?;

        schema::validate(&registered.input_validator, &raw_input).map_err(|reason| {
            AssistError::invalid_argument(format!(
                "input for {} failed validation: {}",
                name, reason
            ))
        })?;

        self.preflight(&registered.definition).await?;

        // bind the session (creating a transient one when the tool needs a
        // session and the caller did not name one), then take the ticket so
        // per-session invocations serialise
        let (session, _ticket) = if registered.definition.requires_session {
            let session_id = match &opts.session_id {
                Some(id) => id.clone(),
                None => {
                    self.sessions
                        .create(json!({"transient": true, "tool": name}))
                        .await?
                }
            };
            let view = self.sessions.get(&session_id)?;
            let ticket = self.sessions.ticket(&session_id)?;
            let guard = ticket.lock_owned().await;
            self.sessions.touch(&session_id).await?;
            (Some(view), Some(guard))
        } else {
            (None, None)
        };

        let jail = match &session {
            Some(view) => Some(Jail::new(view.workspace())?),
            None => None,
        };
        let session_id = session.as_ref().map(|s| s.session_id().to_string());

        let timeout = opts.timeout.unwrap_or(registered.definition.default_timeout);
        let progress_token = opts
            .progress_token
            .unwrap_or_else(|| json!(uuid::Uuid::new_v4().to_string()));
        let ctx = ToolContext::new(
            session,
            jail,
            Arc::clone(&self.runner),
            Arc::clone(&self.policy),
            Arc::clone(&self.sampling),
            Arc::clone(&self.config),
            opts.cancel.clone(),
            Instant::now() + timeout,
            opts.progress_sink,
            progress_token,
        );

        let body = AssertUnwindSafe(registered.tool.execute(raw_input, &ctx)).catch_unwind();
        let outcome = tokio::select! {
            result = tokio::time::timeout(timeout, body) => match result {
                Err(_) => Err(AssistError::timeout(format!(
                    "{} exceeded its {}s deadline",
                    name,
                    timeout.as_secs()
                ))),
                Ok(Err(panic)) => {
                    let correlation_id = uuid::Uuid::new_v4().to_string();
                    let detail = panic_message(&panic);
                    log::error!("tool {} panicked [{}]: {}", name, correlation_id, detail);
                    Err(AssistError::internal(format!("tool {} failed internally", name))
                        .with_correlation_id(correlation_id))
                }
                Ok(Ok(result)) => result,
            },
            _ = opts.cancel.cancelled() => Err(AssistError::cancelled(format!(
                "{} cancelled by caller",
                name
            ))),
        };

        let mut output = outcome?;

        #[cfg(debug_assertions)]
        if let Some(validator) = &registered.output_validator {
            if let Err(reason) = schema::validate(validator, &output) {
                log::warn!("tool {} output failed its own schema: {}", name, reason);
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = &registered.output_validator;

        if let (Some(obj), Some(id)) = (output.as_object_mut(), session_id) {
            obj.entry("session_id").or_insert_with(|| json!(id));
        }
        Ok(output)
    }

    /// Side-effect preflights: a declared dependency on docker or kubectl
    /// that is not satisfiable short-circuits before the tool body runs.
    async fn preflight(&self, definition: &ToolDefinition) -> Result<()> {
        if definition.side_effects.contains(&SideEffect::InvokesDocker)
            && !self.docker_reachable().await
        {
            return Err(AssistError::precondition_failed(
                "docker daemon is not reachable",
            )
            .with_tool("docker")
            .with_hint("start the docker daemon or check DOCKER_HOST"));
        }
        if definition.side_effects.contains(&SideEffect::InvokesK8s) && !self.kubectl_present().await
        {
            return Err(AssistError::precondition_failed(
                "kubectl is not available on PATH",
            )
            .with_tool("kubectl")
            .with_hint("install kubectl and configure cluster access"));
        }
        Ok(())
    }

    /// Probe the docker daemon, caching the verdict briefly.
    pub async fn docker_reachable(&self) -> bool {
        if let Some((at, verdict)) = *self.docker_probe.lock() {
            if at.elapsed() < PROBE_TTL {
                return verdict;
            }
        }
        let verdict = tokio::task::spawn_blocking(|| {
            std::process::Command::new("docker")
                .args(["info", "--format", "{{.ServerVersion}}"])
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .map(|status| status.success())
                .unwrap_or(false)
        })
        .await
        .unwrap_or(false);
        *self.docker_probe.lock() = Some((Instant::now(), verdict));
        verdict
    }

    /// Probe for kubectl, caching the verdict briefly.
    pub async fn kubectl_present(&self) -> bool {
        if let Some((at, verdict)) = *self.k8s_probe.lock() {
            if at.elapsed() < PROBE_TTL {
                return verdict;
            }
        }
        let verdict =
            tokio::task::spawn_blocking(|| CommandRunner::is_available("kubectl"))
                .await
                .unwrap_or(false);
        *self.k8s_probe.lock() = Some((Instant::now(), verdict));
        verdict
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
