//! Strict structured-output validation.
//!
//! When a request demands a schema, the reply is either valid JSON that
//! conforms to it or a classified [`CallError::InvalidResponse`], never
//! a silent success.

use crate::error::CallError;
use serde_json::Value as JsonValue;

/// Validates a parsed reply against the demanded JSON schema.
///
/// # Errors
///
/// Returns [`CallError::Permanent`] when the schema itself does not
/// compile (the request is at fault) and [`CallError::InvalidResponse`]
/// when the instance does not conform.
pub fn validate_structured(schema: &JsonValue, instance: &JsonValue) -> Result<(), CallError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| CallError::Permanent {
        reason: format!("output schema does not compile: {e}"),
    })?;

    validator
        .validate(instance)
        .map_err(|e| CallError::InvalidResponse {
            reason: format!("schema validation failed at {}: {}", e.instance_path, e),
        })
}

/// Parses model output that is expected to be a JSON document.
///
/// Models frequently wrap JSON in a markdown fence; the fence is
/// stripped before parsing.
///
/// # Errors
///
/// Returns [`CallError::InvalidResponse`] when no JSON document can be
/// parsed from the content.
pub fn parse_json_reply(content: &str) -> Result<JsonValue, CallError> {
    let trimmed = content.trim();
    let candidate = strip_code_fence(trimmed).unwrap_or(trimmed);

    serde_json::from_str(candidate).map_err(|e| CallError::InvalidResponse {
        reason: format!("reply is not valid JSON: {e}"),
    })
}

/// Returns the interior of a ```-fenced block, if the content is one.
fn strip_code_fence(content: &str) -> Option<&str> {
    let rest = content.strip_prefix("```")?;
    // Drop an optional language tag on the opening fence line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.strip_suffix("```").map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quiz_schema() -> JsonValue {
        json!({
            "type": "object",
            "properties": {
                "question": { "type": "string" },
                "choices": { "type": "array", "items": { "type": "string" }, "minItems": 2 }
            },
            "required": ["question", "choices"]
        })
    }

    #[test]
    fn conforming_instance_passes() {
        let instance = json!({
            "question": "What does chlorophyll absorb?",
            "choices": ["light", "soil"]
        });
        assert!(validate_structured(&quiz_schema(), &instance).is_ok());
    }

    #[test]
    fn missing_required_field_is_invalid_response() {
        let instance = json!({ "question": "incomplete" });
        let err = validate_structured(&quiz_schema(), &instance).unwrap_err();
        assert!(matches!(err, CallError::InvalidResponse { .. }));
    }

    #[test]
    fn wrong_type_is_invalid_response() {
        let instance = json!({ "question": 7, "choices": ["a", "b"] });
        let err = validate_structured(&quiz_schema(), &instance).unwrap_err();
        assert!(matches!(err, CallError::InvalidResponse { .. }));
    }

    #[test]
    fn malformed_schema_is_permanent() {
        let schema = json!({ "type": "not_a_real_type" });
        let err = validate_structured(&schema, &json!({})).unwrap_err();
        assert!(matches!(err, CallError::Permanent { .. }));
    }

    #[test]
    fn parses_bare_json() {
        let value = parse_json_reply(r#"{"question": "q", "choices": ["a", "b"]}"#).unwrap();
        assert_eq!(value["question"], "q");
    }

    #[test]
    fn parses_fenced_json() {
        let content = "```json\n{\"question\": \"q\", \"choices\": [\"a\", \"b\"]}\n```";
        let value = parse_json_reply(content).unwrap();
        assert_eq!(value["choices"][0], "a");
    }

    #[test]
    fn prose_reply_is_invalid_response() {
        let err = parse_json_reply("Here is your quiz!").unwrap_err();
        assert!(matches!(err, CallError::InvalidResponse { .. }));
    }
}
