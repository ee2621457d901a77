//! Configuration loading
//!
//! Configuration is layered: built-in defaults, then an optional TOML file
//! (`.containerization-assist.toml` in the working directory, falling back to
//! the home directory), then environment variable overrides. The environment
//! always wins so a supervising process can tune the server without a file.

pub mod types;

pub use types::{
    Config, DockerConfig, KubernetesConfig, PolicyConfig, SamplingConfig, ServerConfig,
    SessionConfig,
};

use crate::error::{AssistError, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_FILE_NAME: &str = ".containerization-assist.toml";

/// Get the global config file path (~/.containerization-assist.toml)
pub fn global_config_path() -> Option<PathBuf> {
    env::var_os("HOME").map(|h| PathBuf::from(h).join(CONFIG_FILE_NAME))
}

/// Get the local config file path (cwd/.containerization-assist.toml)
pub fn local_config_path(base: &Path) -> PathBuf {
    base.join(CONFIG_FILE_NAME)
}

/// Load configuration: defaults, then file, then environment overrides.
pub fn load_config(base: Option<&Path>) -> Result<Config> {
    let mut config = load_file_config(base)?;
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn load_file_config(base: Option<&Path>) -> Result<Config> {
    if let Some(base) = base {
        let local = local_config_path(base);
        if local.exists() {
            return parse_file(&local);
        }
    }
    if let Some(global) = global_config_path() {
        if global.exists() {
            return parse_file(&global);
        }
    }
    Ok(Config::default())
}

fn parse_file(path: &Path) -> Result<Config> {
    let content = fs::read_to_string(path)
        .map_err(|e| AssistError::io(format!("cannot read {}: {}", path.display(), e)))?;
    toml::from_str(&content).map_err(|e| {
        AssistError::invalid_argument(format!("invalid config {}: {}", path.display(), e))
    })
}

/// Apply the recognised environment variables on top of `config`.
///
/// A malformed value is a configuration error: the server refuses to start
/// rather than silently running with a default the operator did not intend.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Ok(root) = env::var("WORKSPACE_ROOT") {
        config.session.workspace_root = PathBuf::from(root);
    }
    if let Ok(raw) = env::var("SESSION_TIMEOUT") {
        config.session.idle_timeout = parse_env_duration("SESSION_TIMEOUT", &raw)?;
    }
    if let Ok(raw) = env::var("MAX_SESSIONS") {
        config.session.max_sessions = parse_env_number("MAX_SESSIONS", &raw)?;
    }
    if let Ok(path) = env::var("POLICY_PATH") {
        config.policy.policy_file = Some(PathBuf::from(path));
    }
    if let Ok(raw) = env::var("SAMPLING_MAX_TOKENS") {
        config.sampling.max_tokens = parse_env_number("SAMPLING_MAX_TOKENS", &raw)? as u32;
    }
    if let Ok(raw) = env::var("SAMPLING_TEMPERATURE") {
        config.sampling.temperature = raw.parse().map_err(|_| {
            AssistError::invalid_argument(format!("SAMPLING_TEMPERATURE: invalid value {:?}", raw))
        })?;
    }
    if let Ok(raw) = env::var("SAMPLING_RETRY_ATTEMPTS") {
        config.sampling.retry_attempts = parse_env_number("SAMPLING_RETRY_ATTEMPTS", &raw)? as u32;
    }
    if let Ok(raw) = env::var("SAMPLING_BASE_BACKOFF") {
        config.sampling.base_backoff = parse_env_duration("SAMPLING_BASE_BACKOFF", &raw)?;
    }
    if let Ok(raw) = env::var("SAMPLING_MAX_BACKOFF") {
        config.sampling.max_backoff = parse_env_duration("SAMPLING_MAX_BACKOFF", &raw)?;
    }
    if let Ok(raw) = env::var("TRACING_ENABLED") {
        config.server.tracing_enabled = parse_env_bool("TRACING_ENABLED", &raw)?;
    }
    if let Ok(raw) = env::var("TRACE_SAMPLE_RATE") {
        let rate: f64 = raw.parse().map_err(|_| {
            AssistError::invalid_argument(format!("TRACE_SAMPLE_RATE: invalid value {:?}", raw))
        })?;
        if !(0.0..=1.0).contains(&rate) {
            return Err(AssistError::invalid_argument(format!(
                "TRACE_SAMPLE_RATE: {} outside 0.0..=1.0",
                rate
            )));
        }
        config.server.trace_sample_rate = rate;
    }
    if let Ok(raw) = env::var("METRICS_ENABLED") {
        config.server.metrics_enabled = parse_env_bool("METRICS_ENABLED", &raw)?;
    }
    Ok(())
}

fn parse_env_duration(name: &str, raw: &str) -> Result<std::time::Duration> {
    types::parse_duration(raw)
        .map_err(|e| AssistError::invalid_argument(format!("{}: {}", name, e)))
}

fn parse_env_number(name: &str, raw: &str) -> Result<usize> {
    raw.parse()
        .map_err(|_| AssistError::invalid_argument(format!("{}: invalid value {:?}", name, raw)))
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(AssistError::invalid_argument(format!(
            "{}: invalid boolean {:?}",
            name, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let config = load_file_config(Some(Path::new("/nonexistent"))).unwrap();
        assert_eq!(config.session.max_sessions, 32);
    }

    #[test]
    fn env_bool_parsing() {
        assert!(parse_env_bool("X", "true").unwrap());
        assert!(parse_env_bool("X", "1").unwrap());
        assert!(!parse_env_bool("X", "off").unwrap());
        assert!(parse_env_bool("X", "maybe").is_err());
    }

    #[test]
    fn observability_env_overrides() {
        unsafe {
            env::set_var("TRACING_ENABLED", "true");
            env::set_var("TRACE_SAMPLE_RATE", "0.25");
            env::set_var("METRICS_ENABLED", "on");
        }
        let mut config = Config::default();
        apply_env_overrides(&mut config).unwrap();
        assert!(config.server.tracing_enabled);
        assert!((config.server.trace_sample_rate - 0.25).abs() < f64::EPSILON);
        assert!(config.server.metrics_enabled);

        unsafe {
            env::set_var("TRACE_SAMPLE_RATE", "1.5");
        }
        assert!(apply_env_overrides(&mut Config::default()).is_err());

        unsafe {
            env::remove_var("TRACING_ENABLED");
            env::remove_var("TRACE_SAMPLE_RATE");
            env::remove_var("METRICS_ENABLED");
        }
    }

    #[test]
    fn toml_roundtrip() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.session.max_sessions, config.session.max_sessions);
        assert_eq!(parsed.sampling.max_tokens, config.sampling.max_tokens);
    }
}
