//! Sampling client
//!
//! The server performs no inference. When a tool needs generative output it
//! builds a [`SamplingRequest`] and this client delegates it to the RPC peer
//! via `sampling/createMessage`, then handles the unreliable parts: bounded
//! retries with jittered exponential backoff, JSON extraction from prose,
//! schema validation, and a repair loop that tells the peer exactly why its
//! previous answer was rejected.
//!
//! Concurrency towards the peer is bounded; calls beyond the bound queue up
//! to a limit and then fail with `resource_exhausted`.

pub mod extract;
pub mod templates;

pub use templates::TemplateStore;

use crate::common::schema;
use crate::config::SamplingConfig;
use crate::error::{AssistError, ErrorKind, Result};
use crate::rpc::peer::PeerHandle;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Transport failures worth retrying, per message text.
static RETRYABLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)timeout|rate limit|temporarily|unavailable|connection refused|network|dns")
        .expect("valid regex")
});

/// A generation request.
#[derive(Debug, Clone, Default)]
pub struct SamplingRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub stop_sequences: Vec<String>,
    pub top_p: Option<f64>,
    pub frequency_penalty: Option<f64>,
    /// When set, the reply must contain JSON conforming to this schema
    pub output_schema: Option<Value>,
}

impl SamplingRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }
}

/// A generation reply.
#[derive(Debug, Clone)]
pub struct SamplingResponse {
    pub content: String,
    pub tokens_used: Option<u64>,
    pub stop_reason: Option<String>,
    pub model: Option<String>,
    /// Present when an output schema was declared: the validated extraction
    pub json: Option<Value>,
}

/// Scripted reply for tests: either content or a transport error.
pub type ScriptedReply = std::result::Result<String, AssistError>;

enum Backend {
    Peer(Arc<PeerHandle>),
    Scripted(parking_lot::Mutex<VecDeque<ScriptedReply>>),
    Disconnected,
}

/// Delegates generation to the RPC peer.
pub struct SamplingClient {
    backend: Backend,
    config: SamplingConfig,
    templates: Arc<TemplateStore>,
    permits: tokio::sync::Semaphore,
    queued: AtomicUsize,
}

impl SamplingClient {
    pub fn new(peer: Arc<PeerHandle>, config: SamplingConfig, templates: Arc<TemplateStore>) -> Self {
        let permits = tokio::sync::Semaphore::new(config.max_concurrent.max(1));
        Self {
            backend: Backend::Peer(peer),
            config,
            templates,
            permits,
            queued: AtomicUsize::new(0),
        }
    }

    /// A client with no peer: every call fails `precondition_failed`.
    pub fn disconnected() -> Self {
        let config = SamplingConfig::default();
        let permits = tokio::sync::Semaphore::new(config.max_concurrent.max(1));
        Self {
            backend: Backend::Disconnected,
            config,
            templates: Arc::new(TemplateStore::load(None).expect("embedded templates load")),
            permits,
            queued: AtomicUsize::new(0),
        }
    }

    /// A client that replays canned replies in order. Test double.
    pub fn scripted(replies: Vec<ScriptedReply>, config: SamplingConfig) -> Self {
        let permits = tokio::sync::Semaphore::new(config.max_concurrent.max(1));
        Self {
            backend: Backend::Scripted(parking_lot::Mutex::new(replies.into())),
            config,
            templates: Arc::new(TemplateStore::load(None).expect("embedded templates load")),
            permits,
            queued: AtomicUsize::new(0),
        }
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    /// Execute one sampling call under `deadline`.
    pub async fn sample(
        &self,
        request: SamplingRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<SamplingResponse> {
        let _permit = self.acquire_permit(cancel).await?;

        let started = std::time::Instant::now();
        // identity is stable across retries so the peer can deduplicate
        let sampling_id = uuid::Uuid::new_v4().to_string();
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        let temperature = request.temperature.unwrap_or(self.config.temperature);

        let mut repair: Option<String> = None;
        let mut last_error: Option<AssistError> = None;

        for attempt in 0..=self.config.retry_attempts {
            if cancel.is_cancelled() {
                return Err(AssistError::cancelled("sampling cancelled"));
            }
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(last_error.unwrap_or_else(|| {
                    AssistError::timeout("sampling deadline exhausted before a reply")
                }));
            }

            let prompt = match &repair {
                Some(section) => format!("{}\n\n{}", request.prompt, section),
                None => request.prompt.clone(),
            };
            let params = build_params(
                &prompt,
                &request,
                max_tokens,
                temperature,
                &sampling_id,
            );

            match self.send(params, remaining, cancel).await {
                Ok(raw) => {
                    let response = parse_response(raw)?;
                    let Some(schema_value) = &request.output_schema else {
                        return Ok(response);
                    };
                    match validate_content(&response.content, schema_value) {
                        Ok(extracted) => {
                            return Ok(SamplingResponse {
                                json: Some(extracted),
                                ..response
                            });
                        }
                        Err(reason) => {
                            log::debug!(
                                "sampling attempt {} failed schema validation: {}",
                                attempt + 1,
                                reason
                            );
                            repair = Some(repair_section(&reason, schema_value));
                            last_error = Some(
                                AssistError::invalid_argument(format!(
                                    "schema_violation: sampling response failed validation: {}",
                                    reason
                                ))
                                .with_hint("the peer repeatedly returned non-conforming output"),
                            );
                        }
                    }
                }
                Err(err) if is_retryable(&err) => {
                    log::debug!("sampling attempt {} failed: {}", attempt + 1, err.message);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }

            if attempt < self.config.retry_attempts {
                self.backoff(attempt, cancel).await?;
            }
        }

        Err(last_error
            .unwrap_or_else(|| AssistError::internal("sampling retries exhausted without error")))
    }

    async fn acquire_permit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::SemaphorePermit<'_>> {
        let queue_cap = self.config.max_concurrent.max(1) + self.config.queue_bound;
        let position = self.queued.fetch_add(1, Ordering::SeqCst);
        if position >= queue_cap {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(AssistError::resource_exhausted(format!(
                "sampling queue full ({} outstanding)",
                position
            )));
        }
        let permit = tokio::select! {
            permit = self.permits.acquire() => permit,
            _ = cancel.cancelled() => {
                self.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(AssistError::cancelled("sampling cancelled while queued"));
            }
        };
        self.queued.fetch_sub(1, Ordering::SeqCst);
        permit.map_err(|_| AssistError::internal("sampling semaphore closed"))
    }

    async fn send(
        &self,
        params: Value,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        match &self.backend {
            Backend::Peer(peer) => {
                tokio::select! {
                    result = peer.call("sampling/createMessage", params, deadline) => result,
                    _ = cancel.cancelled() => Err(AssistError::cancelled("sampling cancelled")),
                }
            }
            Backend::Scripted(replies) => {
                let next = replies.lock().pop_front();
                match next {
                    Some(Ok(content)) => Ok(json!({
                        "content": {"type": "text", "text": content},
                        "model": "scripted",
                        "stopReason": "endTurn"
                    })),
                    Some(Err(err)) => Err(err),
                    None => Err(AssistError::precondition_failed(
                        "scripted sampling replies exhausted",
                    )),
                }
            }
            Backend::Disconnected => Err(AssistError::precondition_failed(
                "no sampling peer connected",
            )),
        }
    }

    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        let base = self.config.base_backoff.as_millis() as f64;
        let exp = base * 2f64.powi(attempt as i32);
        let jitter: f64 = rand::random_range(0.75..=1.25);
        let capped = (exp * jitter).min(self.config.max_backoff.as_millis() as f64);
        let wait = Duration::from_millis(capped as u64);
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = cancel.cancelled() => Err(AssistError::cancelled("sampling cancelled during backoff")),
        }
    }

    // ── Convenience wrappers: template + schema pairs ──────────────────

    /// Ask the peer to review a Dockerfile.
    pub async fn analyze_dockerfile(
        &self,
        dockerfile: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut ctx = tera::Context::new();
        ctx.insert("dockerfile", dockerfile);
        let prompt = self.templates.render("analysis/dockerfile", &ctx)?;
        let request = SamplingRequest::new(prompt).with_schema(ISSUES_SCHEMA.clone());
        let response = self.sample(request, deadline, cancel).await?;
        Ok(response.json.unwrap_or(Value::Null))
    }

    /// Ask the peer to correct a Dockerfile against named violations.
    pub async fn fix_dockerfile(
        &self,
        dockerfile: &str,
        violations: &[String],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut ctx = tera::Context::new();
        ctx.insert("dockerfile", dockerfile);
        ctx.insert("violations", violations);
        let prompt = self.templates.render("dockerfile/fix", &ctx)?;
        let request = SamplingRequest::new(prompt).with_schema(FIX_SCHEMA.clone());
        let response = self.sample(request, deadline, cancel).await?;
        Ok(response.json.unwrap_or(Value::Null))
    }

    /// Ask the peer to review a Kubernetes manifest.
    pub async fn analyze_manifest(
        &self,
        manifest: &str,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut ctx = tera::Context::new();
        ctx.insert("manifest", manifest);
        let prompt = self.templates.render("analysis/manifest", &ctx)?;
        let request = SamplingRequest::new(prompt).with_schema(ISSUES_SCHEMA.clone());
        let response = self.sample(request, deadline, cancel).await?;
        Ok(response.json.unwrap_or(Value::Null))
    }

    /// Ask the peer to interpret a scan summary.
    pub async fn analyze_scan(
        &self,
        image: &str,
        summary: &crate::scanner::SummaryCounts,
        top_findings: &[String],
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let mut ctx = tera::Context::new();
        ctx.insert("image", image);
        ctx.insert("critical", &summary.critical);
        ctx.insert("high", &summary.high);
        ctx.insert("medium", &summary.medium);
        ctx.insert("low", &summary.low);
        ctx.insert("top_findings", top_findings);
        let prompt = self.templates.render("analysis/scan", &ctx)?;
        let request = SamplingRequest::new(prompt).with_schema(ASSESSMENT_SCHEMA.clone());
        let response = self.sample(request, deadline, cancel).await?;
        Ok(response.json.unwrap_or(Value::Null))
    }
}

static ISSUES_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "issues": {"type": "array"},
            "summary": {"type": "string"}
        },
        "required": ["issues", "summary"]
    })
});

static FIX_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "dockerfile": {"type": "string"},
            "changes": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["dockerfile"]
    })
});

static ASSESSMENT_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "type": "object",
        "properties": {
            "assessment": {"type": "string"},
            "priorities": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["assessment", "priorities"]
    })
});

fn build_params(
    prompt: &str,
    request: &SamplingRequest,
    max_tokens: u32,
    temperature: f64,
    sampling_id: &str,
) -> Value {
    let mut params = json!({
        "messages": [{
            "role": "user",
            "content": {"type": "text", "text": prompt}
        }],
        "maxTokens": max_tokens,
        "temperature": temperature,
        "metadata": {"samplingId": sampling_id}
    });
    let obj = params.as_object_mut().expect("params is an object");
    if let Some(system) = &request.system {
        obj.insert("systemPrompt".into(), json!(system));
    }
    if !request.stop_sequences.is_empty() {
        obj.insert("stopSequences".into(), json!(request.stop_sequences));
    }
    if let Some(top_p) = request.top_p {
        obj.insert("topP".into(), json!(top_p));
    }
    if let Some(penalty) = request.frequency_penalty {
        obj.insert("frequencyPenalty".into(), json!(penalty));
    }
    params
}

fn parse_response(raw: Value) -> Result<SamplingResponse> {
    let content = match &raw["content"] {
        Value::String(text) => text.clone(),
        Value::Object(obj) => obj
            .get("text")
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| {
                AssistError::external_tool("sampling reply content object has no text")
            })?,
        _ => {
            return Err(AssistError::external_tool(
                "sampling reply carries no content",
            ));
        }
    };
    Ok(SamplingResponse {
        content,
        tokens_used: raw["usage"]["tokens"]
            .as_u64()
            .or_else(|| raw["tokensUsed"].as_u64()),
        stop_reason: raw["stopReason"].as_str().map(String::from),
        model: raw["model"].as_str().map(String::from),
        json: None,
    })
}

fn validate_content(content: &str, schema_value: &Value) -> std::result::Result<Value, String> {
    let extracted = extract::extract_json(content).map_err(|e| e.message)?;
    schema::validate_once(schema_value, &extracted)?;
    Ok(extracted)
}

fn repair_section(reason: &str, schema_value: &Value) -> String {
    format!(
        "The previous response failed validation with error: {}.\n\
         Return only valid JSON conforming to this schema:\n{}",
        reason,
        serde_json::to_string_pretty(schema_value).unwrap_or_default()
    )
}

fn is_retryable(err: &AssistError) -> bool {
    if err.kind == ErrorKind::Cancelled || err.kind == ErrorKind::PreconditionFailed {
        return false;
    }
    err.kind.is_retryable() || RETRYABLE_PATTERN.is_match(&err.message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> SamplingConfig {
        SamplingConfig {
            retry_attempts: 2,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..SamplingConfig::default()
        }
    }

    fn token() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn plain_sample_returns_content() {
        let client = SamplingClient::scripted(
            vec![Ok("FROM node:20-alpine".to_string())],
            fast_config(),
        );
        let response = client
            .sample(
                SamplingRequest::new("generate"),
                Duration::from_secs(5),
                &token(),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "FROM node:20-alpine");
        assert_eq!(response.model.as_deref(), Some("scripted"));
        assert!(response.json.is_none());
    }

    #[tokio::test]
    async fn schema_repair_loop_recovers() {
        let schema = json!({
            "type": "object",
            "properties": {"dockerfile": {"type": "string"}},
            "required": ["dockerfile"]
        });
        let client = SamplingClient::scripted(
            vec![
                Ok("not json at all".to_string()),
                Ok(r#"{"dockerfile": "FROM x:1"}"#.to_string()),
            ],
            fast_config(),
        );
        let response = client
            .sample(
                SamplingRequest::new("generate").with_schema(schema),
                Duration::from_secs(5),
                &token(),
            )
            .await
            .unwrap();
        assert_eq!(response.json.unwrap()["dockerfile"], "FROM x:1");
    }

    #[tokio::test]
    async fn exhausted_repairs_surface_schema_violation() {
        let schema = json!({
            "type": "object",
            "properties": {"dockerfile": {"type": "string"}},
            "required": ["dockerfile"]
        });
        let client = SamplingClient::scripted(
            vec![
                Ok("bad".to_string()),
                Ok("still bad".to_string()),
                Ok("nope".to_string()),
            ],
            fast_config(),
        );
        let err = client
            .sample(
                SamplingRequest::new("generate").with_schema(schema),
                Duration::from_secs(5),
                &token(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
        assert!(err.message.contains("schema_violation"));
    }

    #[tokio::test]
    async fn retryable_transport_error_retries() {
        let client = SamplingClient::scripted(
            vec![
                Err(AssistError::network("connection refused by peer")),
                Ok("recovered".to_string()),
            ],
            fast_config(),
        );
        let response = client
            .sample(
                SamplingRequest::new("generate"),
                Duration::from_secs(5),
                &token(),
            )
            .await
            .unwrap();
        assert_eq!(response.content, "recovered");
    }

    #[tokio::test]
    async fn non_retryable_error_is_immediate() {
        let client = SamplingClient::scripted(
            vec![
                Err(AssistError::invalid_argument("peer rejected params")),
                Ok("never reached".to_string()),
            ],
            fast_config(),
        );
        let err = client
            .sample(
                SamplingRequest::new("generate"),
                Duration::from_secs(5),
                &token(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);
    }

    #[tokio::test]
    async fn disconnected_client_fails_precondition() {
        let client = SamplingClient::disconnected();
        let err = client
            .sample(
                SamplingRequest::new("anything"),
                Duration::from_secs(1),
                &token(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn cancellation_stops_sampling() {
        let cancel = token();
        cancel.cancel();
        let client = SamplingClient::scripted(vec![Ok("x".to_string())], fast_config());
        let err = client
            .sample(SamplingRequest::new("p"), Duration::from_secs(1), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn retryable_classification() {
        assert!(is_retryable(&AssistError::external_tool(
            "peer returned error -32000: rate limit exceeded"
        )));
        assert!(is_retryable(&AssistError::external_tool(
            "service temporarily unavailable"
        )));
        assert!(is_retryable(&AssistError::timeout("deadline")));
        assert!(!is_retryable(&AssistError::cancelled("stop")));
        assert!(!is_retryable(&AssistError::invalid_argument("bad params")));
    }

    #[test]
    fn response_parsing_tolerates_shapes() {
        let object_shape = json!({"content": {"type": "text", "text": "hello"}, "model": "m"});
        assert_eq!(parse_response(object_shape).unwrap().content, "hello");

        let string_shape = json!({"content": "plain", "tokensUsed": 42});
        let parsed = parse_response(string_shape).unwrap();
        assert_eq!(parsed.content, "plain");
        assert_eq!(parsed.tokens_used, Some(42));

        assert!(parse_response(json!({"nope": 1})).is_err());
    }
}
