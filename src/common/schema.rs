//! JSON-Schema helpers
//!
//! Tool input schemas compile once at registration; sampling output schemas
//! compile per request. Validation errors carry the instance path so callers
//! can point at the offending field.

use jsonschema::Validator;
use serde_json::Value;

/// Compile a schema, or explain why it is unusable.
pub fn compile(schema: &Value) -> Result<Validator, String> {
    jsonschema::validator_for(schema).map_err(|e| e.to_string())
}

/// Validate an instance, reporting the first failure as `path: message`.
pub fn validate(validator: &Validator, instance: &Value) -> Result<(), String> {
    match validator.iter_errors(instance).next() {
        None => Ok(()),
        Some(error) => {
            let path = error.instance_path.to_string();
            if path.is_empty() {
                Err(error.to_string())
            } else {
                Err(format!("{}: {}", path, error))
            }
        }
    }
}

/// One-shot compile-and-validate for ad hoc schemas.
pub fn validate_once(schema: &Value, instance: &Value) -> Result<(), String> {
    let validator = compile(schema)?;
    validate(&validator, instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_instance_passes() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        assert!(validate_once(&schema, &json!({"name": "demo"})).is_ok());
    }

    #[test]
    fn missing_required_field_reports() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let err = validate_once(&schema, &json!({})).unwrap_err();
        assert!(err.contains("name"));
    }

    #[test]
    fn wrong_type_reports_path() {
        let schema = json!({
            "type": "object",
            "properties": {"port": {"type": "integer"}}
        });
        let err = validate_once(&schema, &json!({"port": "8080"})).unwrap_err();
        assert!(err.contains("/port"));
    }

    #[test]
    fn malformed_schema_is_reported() {
        let schema = json!({"type": "definitely-not-a-type"});
        assert!(compile(&schema).is_err());
    }
}
