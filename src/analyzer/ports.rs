//! Listening port detection
//!
//! Scans `.env` files, configuration files, and the detected entry points for
//! port declarations. Only values in the valid TCP range are accepted; the
//! first hit in scan order wins, with `.env` outranking config outranking
//! source.

use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static PORT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)port[^\d]*(\d+)").expect("valid regex"));

/// Config files scanned after `.env` variants.
const CONFIG_FILES: &[&str] = &[
    "application.properties",
    "application.yml",
    "application.yaml",
    "src/main/resources/application.properties",
    "src/main/resources/application.yml",
    "src/main/resources/application.yaml",
    "config.yaml",
    "config.yml",
    "config.json",
    "settings.py",
    "app.yaml",
];

const ENV_FILES: &[&str] = &[".env", ".env.local", ".env.production"];

/// Detect the service's listening port, if any file declares one.
pub fn detect_port(root: &Path, entry_points: &[String]) -> Result<Option<u16>> {
    for file in ENV_FILES {
        if let Some(port) = scan_file(&root.join(file)) {
            return Ok(Some(port));
        }
    }
    for file in CONFIG_FILES {
        if let Some(port) = scan_file(&root.join(file)) {
            return Ok(Some(port));
        }
    }
    for entry in entry_points {
        if let Some(port) = scan_file(&root.join(entry)) {
            return Ok(Some(port));
        }
    }
    Ok(None)
}

fn scan_file(path: &Path) -> Option<u16> {
    let content = super::read_capped(path)?;
    first_valid_port(&content)
}

/// First port-shaped number in the 1..=65535 range.
pub fn first_valid_port(content: &str) -> Option<u16> {
    for captures in PORT_PATTERN.captures_iter(content) {
        if let Ok(port) = captures[1].parse::<u32>() {
            if (1..=65535).contains(&port) {
                return Some(port as u16);
            }
        }
    }
    None
}
