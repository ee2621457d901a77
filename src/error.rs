//! Error types for the containerization assist server
//!
//! Every failure that crosses a tool or RPC boundary is an [`AssistError`].
//! The taxonomy is closed: callers can match on [`ErrorKind`] to decide on
//! retries, and the RPC front-end maps each kind to a stable JSON-RPC code.
//!
//! Tools attach machine-readable context (offending path, exit code, scanner
//! name) and, where one exists, an actionable hint that is forwarded to the
//! peer inside the error's `data` object.

use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;

/// Convenient result alias used throughout the crate.
pub type Result<T, E = AssistError> = std::result::Result<T, E>;

/// Closed set of failure kinds surfaced by tools and subsystems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    PreconditionFailed,
    Unauthorized,
    Timeout,
    Cancelled,
    Network,
    Io,
    ResourceExhausted,
    PolicyViolation,
    ExternalTool,
    Internal,
}

impl ErrorKind {
    /// Stable JSON-RPC error code for this kind.
    ///
    /// Codes live in the server-defined range below -32000 so they never
    /// collide with the reserved protocol codes.
    pub fn code(&self) -> i64 {
        match self {
            Self::InvalidArgument => -32602,
            Self::NotFound => -32001,
            Self::PreconditionFailed => -32002,
            Self::Unauthorized => -32003,
            Self::Timeout => -32004,
            Self::Cancelled => -32005,
            Self::Network => -32006,
            Self::Io => -32007,
            Self::ResourceExhausted => -32008,
            Self::PolicyViolation => -32009,
            Self::ExternalTool => -32010,
            Self::Internal => -32011,
        }
    }

    /// Snake-case identifier used in structured error payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::PreconditionFailed => "precondition_failed",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Network => "network",
            Self::Io => "io",
            Self::ResourceExhausted => "resource_exhausted",
            Self::PolicyViolation => "policy_violation",
            Self::ExternalTool => "external_tool",
            Self::Internal => "internal",
        }
    }

    /// Whether a failure of this kind may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::ResourceExhausted)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed error with optional machine context and an actionable hint.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct AssistError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offending filesystem path, if the failure is path-related.
    pub path: Option<String>,
    /// Exit code of a failed external process.
    pub exit_code: Option<i32>,
    /// Name of the external tool involved (docker, trivy, kubectl, ...).
    pub tool: Option<String>,
    /// Actionable remediation hint forwarded to the caller.
    pub hint: Option<String>,
    /// Stable identifier for correlating internal failures in logs.
    pub correlation_id: Option<String>,
}

impl AssistError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            path: None,
            exit_code: None,
            tool: None,
            hint: None,
            correlation_id: None,
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PreconditionFailed, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn policy_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PolicyViolation, message)
    }

    pub fn external_tool(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalTool, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Structured `data` object attached to the JSON-RPC error.
    pub fn to_data(&self) -> Value {
        let mut data = json!({
            "kind": self.kind.as_str(),
            "retryable": self.kind.is_retryable(),
        });
        let obj = data.as_object_mut().expect("data is an object");
        if let Some(path) = &self.path {
            obj.insert("path".into(), json!(path));
        }
        if let Some(code) = self.exit_code {
            obj.insert("exit_code".into(), json!(code));
        }
        if let Some(tool) = &self.tool {
            obj.insert("tool".into(), json!(tool));
        }
        if let Some(hint) = &self.hint {
            obj.insert("hint".into(), json!(hint));
        }
        if let Some(id) = &self.correlation_id {
            obj.insert("correlation_id".into(), json!(id));
        }
        data
    }
}

impl From<std::io::Error> for AssistError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind as IoKind;
        match e.kind() {
            IoKind::NotFound => AssistError::not_found(e.to_string()),
            IoKind::PermissionDenied => AssistError::unauthorized(e.to_string()),
            IoKind::TimedOut => AssistError::timeout(e.to_string()),
            _ => AssistError::io(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for AssistError {
    fn from(e: serde_json::Error) -> Self {
        AssistError::invalid_argument(format!("invalid JSON: {}", e))
    }
}

impl From<sled::Error> for AssistError {
    fn from(e: sled::Error) -> Self {
        AssistError::io(format!("store error: {}", e))
    }
}

impl From<tera::Error> for AssistError {
    fn from(e: tera::Error) -> Self {
        AssistError::internal(format!("template error: {}", e))
    }
}
