use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
}

/// Server-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Consecutive unparseable wire frames tolerated before aborting
    pub max_protocol_errors: u32,
    /// Emit module targets in log output
    pub tracing_enabled: bool,
    /// Fraction of traced operations sampled when tracing is enabled
    pub trace_sample_rate: f64,
    /// Collect internal metrics counters
    pub metrics_enabled: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_protocol_errors: 5,
            tracing_enabled: false,
            trace_sample_rate: 1.0,
            metrics_enabled: false,
        }
    }
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Root directory for session workspaces and the store
    pub workspace_root: PathBuf,
    /// Idle TTL after which a session expires
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Maximum number of active sessions
    pub max_sessions: usize,
    /// Grace period before a terminated session's workspace is removed
    #[serde(with = "humantime_serde")]
    pub removal_grace: Duration,
    /// Sweeper tick interval
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            idle_timeout: Duration::from_secs(30 * 60),
            max_sessions: 32,
            removal_grace: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

fn default_workspace_root() -> PathBuf {
    std::env::temp_dir().join("containerization-assist")
}

/// Sampling (delegated generation) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    pub max_tokens: u32,
    pub temperature: f64,
    /// Retries after the initial attempt
    pub retry_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub base_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    /// Concurrent outstanding requests towards the peer
    pub max_concurrent: usize,
    /// Queued calls beyond the concurrency limit before rejection
    pub queue_bound: usize,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
            retry_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            // stdio peers announce no concurrency; assume one in flight
            max_concurrent: 1,
            queue_bound: 32,
        }
    }
}

/// Policy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Directory scanned for policy documents (lexicographic merge order)
    pub policy_dir: PathBuf,
    /// Explicit single policy file; takes precedence over the directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_file: Option<PathBuf>,
    /// Bounded re-prompt iterations when generation violates strict policy
    pub max_fix_iterations: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policy_dir: PathBuf::from("policies"),
            policy_file: None,
            max_fix_iterations: 3,
        }
    }
}

/// Docker integration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// How long a verified registry login stays trusted
    #[serde(with = "humantime_serde")]
    pub auth_cache_ttl: Duration,
    /// Deadline for container startup during runtime validation
    #[serde(with = "humantime_serde")]
    pub startup_deadline: Duration,
    /// Log patterns that mark a validated startup as successful
    pub success_patterns: Vec<String>,
    /// Log patterns that mark a validated startup as failed
    pub failure_patterns: Vec<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            auth_cache_ttl: Duration::from_secs(30 * 60),
            startup_deadline: Duration::from_secs(30),
            success_patterns: Vec::new(),
            failure_patterns: Vec::new(),
        }
    }
}

/// Kubernetes integration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    /// Default namespace for deployments
    pub namespace: String,
    /// Readiness polling interval
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Overall readiness deadline
    #[serde(with = "humantime_serde")]
    pub readiness_deadline: Duration,
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            poll_interval: Duration::from_secs(2),
            readiness_deadline: Duration::from_secs(120),
        }
    }
}

/// Duration (de)serialization accepting `30s` / `5m` / `1h` strings.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse `90`, `90s`, `15m`, `2h` into a [`Duration`]. Bare numbers are seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => raw.split_at(idx),
        None => (raw, "s"),
    };
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid duration: {}", raw))?;
    let secs = match unit.trim() {
        "s" | "sec" | "secs" => value,
        "m" | "min" | "mins" => value * 60,
        "h" | "hr" | "hour" | "hours" => value * 3600,
        "ms" => return Ok(Duration::from_millis(value)),
        other => return Err(format!("unknown duration unit: {}", other)),
    };
    Ok(Duration::from_secs(secs))
}

pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return format!("{}ms", d.as_millis());
    }
    if secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_suffixed_durations() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn duration_roundtrip() {
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(900)), "15m");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    }

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.sampling.retry_attempts, 3);
        assert_eq!(config.sampling.max_concurrent, 1);
        assert_eq!(config.session.max_sessions, 32);
        assert!(config.docker.auth_cache_ttl >= Duration::from_secs(60));
        assert!(!config.server.tracing_enabled);
        assert!(!config.server.metrics_enabled);
        assert_eq!(config.server.trace_sample_rate, 1.0);
    }
}
