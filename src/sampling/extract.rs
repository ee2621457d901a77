//! JSON extraction from model output
//!
//! Peers wrap JSON in prose and code fences more often than not. Extraction
//! strips fences first, then finds the outermost balanced braces and parses
//! that slice. String escapes are honoured while balancing so braces inside
//! string values do not derail the scan.

use crate::error::{AssistError, Result};
use serde_json::Value;

/// Extract the first JSON object from free-form content.
pub fn extract_json(content: &str) -> Result<Value> {
    let stripped = strip_code_fences(content);
    let candidate = balanced_object(&stripped).ok_or_else(|| {
        AssistError::invalid_argument("no JSON object found in sampling response")
    })?;
    serde_json::from_str(candidate).map_err(|e| {
        AssistError::invalid_argument(format!("extracted JSON does not parse: {}", e))
    })
}

/// Remove ```-fenced wrappers, keeping the fence bodies.
fn strip_code_fences(content: &str) -> String {
    if !content.contains("```") {
        return content.to_string();
    }
    let mut out = String::with_capacity(content.len());
    let mut in_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// The slice spanning the first balanced `{ ... }` group.
fn balanced_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let bytes = content.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&content[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
