//! Wire translation between the normalized contract and provider APIs.
//!
//! Each [`WireShape`] gets a request builder and a response parser.
//! Provider status codes and error payloads are mapped onto [`CallError`]
//! here, so everything above this module is provider-agnostic.

use crate::descriptor::{ProviderDescriptor, WireShape};
use crate::error::CallError;
use crate::model::{MessageRole, ModelRequest, ModelResponse, TokenUsage};
use crate::validate;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

/// Default completion budget for wire shapes that require `max_tokens`.
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Builds the wire request body for a provider.
#[must_use]
pub fn build_request(descriptor: &ProviderDescriptor, request: &ModelRequest) -> JsonValue {
    match descriptor.wire {
        WireShape::OpenAiChat => build_openai_chat(descriptor, request),
        WireShape::AnthropicMessages => build_anthropic_messages(descriptor, request),
    }
}

/// Parses a provider's HTTP response into the normalized contract.
///
/// # Errors
///
/// Returns a classified [`CallError`] for non-success statuses, for
/// unparseable bodies, and for structured output that fails validation.
pub fn parse_response(
    descriptor: &ProviderDescriptor,
    request: &ModelRequest,
    status: StatusCode,
    body: &str,
) -> Result<ModelResponse, CallError> {
    if !status.is_success() {
        return Err(classify_error_status(status, body));
    }

    let mut response = match descriptor.wire {
        WireShape::OpenAiChat => parse_openai_chat(descriptor, body)?,
        WireShape::AnthropicMessages => parse_anthropic_messages(descriptor, body)?,
    };

    if let Some(schema) = &request.output_schema {
        let parsed = validate::parse_json_reply(&response.content)?;
        validate::validate_structured(schema, &parsed)?;
        response.structured_output = Some(parsed);
    }

    Ok(response)
}

/// System prompt actually sent on the wire.
///
/// When structured output is demanded, the schema contract is stated in
/// the system prompt so every wire shape gets the same instruction.
fn effective_system(request: &ModelRequest) -> Option<String> {
    let schema_note = request.output_schema.as_ref().map(|schema| {
        format!(
            "Respond with only a single JSON document conforming to this schema, \
             with no surrounding prose:\n{schema}"
        )
    });

    match (&request.system, schema_note) {
        (Some(system), Some(note)) => Some(format!("{system}\n\n{note}")),
        (Some(system), None) => Some(system.clone()),
        (None, note) => note,
    }
}

fn build_openai_chat(descriptor: &ProviderDescriptor, request: &ModelRequest) -> JsonValue {
    let mut messages = Vec::new();
    if let Some(system) = effective_system(request) {
        messages.push(json!({ "role": "system", "content": system }));
    }
    for message in &request.history {
        messages.push(json!({ "role": role_name(message.role), "content": message.content }));
    }
    messages.push(json!({ "role": "user", "content": request.prompt }));

    let mut body = json!({
        "model": descriptor.model,
        "messages": messages,
    });
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    if request.output_schema.is_some() {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

fn build_anthropic_messages(descriptor: &ProviderDescriptor, request: &ModelRequest) -> JsonValue {
    let mut messages = Vec::new();
    for message in &request.history {
        // Anthropic accepts only user/assistant turns in `messages`.
        if message.role != MessageRole::System {
            messages.push(json!({ "role": role_name(message.role), "content": message.content }));
        }
    }
    messages.push(json!({ "role": "user", "content": request.prompt }));

    let mut body = json!({
        "model": descriptor.model,
        "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });
    if let Some(system) = effective_system(request) {
        body["system"] = json!(system);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    body
}

const fn role_name(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatBody {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_openai_chat(
    descriptor: &ProviderDescriptor,
    body: &str,
) -> Result<ModelResponse, CallError> {
    let parsed: OpenAiChatBody =
        serde_json::from_str(body).map_err(|e| CallError::InvalidResponse {
            reason: format!("unparseable chat completion body: {e}"),
        })?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CallError::InvalidResponse {
            reason: "completion contained no choices".to_string(),
        })?;

    if choice.finish_reason.as_deref() == Some("content_filter") {
        return Err(CallError::Permanent {
            reason: "completion rejected by provider content policy".to_string(),
        });
    }

    let content = choice
        .message
        .content
        .filter(|c| !c.is_empty())
        .ok_or_else(|| CallError::InvalidResponse {
            reason: "completion contained no content".to_string(),
        })?;

    let usage = parsed.usage.unwrap_or(OpenAiUsage {
        prompt_tokens: 0,
        completion_tokens: 0,
    });

    Ok(ModelResponse {
        content,
        structured_output: None,
        usage: TokenUsage {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        },
        model: parsed.model.unwrap_or_else(|| descriptor.model.clone()),
    })
}

#[derive(Debug, Deserialize)]
struct AnthropicBody {
    #[serde(default)]
    model: Option<String>,
    content: Vec<AnthropicContent>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn parse_anthropic_messages(
    descriptor: &ProviderDescriptor,
    body: &str,
) -> Result<ModelResponse, CallError> {
    let parsed: AnthropicBody =
        serde_json::from_str(body).map_err(|e| CallError::InvalidResponse {
            reason: format!("unparseable messages body: {e}"),
        })?;

    if parsed.stop_reason.as_deref() == Some("refusal") {
        return Err(CallError::Permanent {
            reason: "completion rejected by provider content policy".to_string(),
        });
    }

    let content = parsed
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .and_then(|block| block.text)
        .filter(|text| !text.is_empty())
        .ok_or_else(|| CallError::InvalidResponse {
            reason: "completion contained no text block".to_string(),
        })?;

    let usage = parsed.usage.unwrap_or(AnthropicUsage {
        input_tokens: 0,
        output_tokens: 0,
    });

    Ok(ModelResponse {
        content,
        structured_output: None,
        usage: TokenUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        },
        model: parsed.model.unwrap_or_else(|| descriptor.model.clone()),
    })
}

/// Maps a non-success HTTP status onto the internal taxonomy.
fn classify_error_status(status: StatusCode, body: &str) -> CallError {
    let message = provider_error_message(body)
        .unwrap_or_else(|| truncate(body, 200));
    let reason = format!("status {}: {message}", status.as_u16());

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        CallError::Transient { reason }
    } else {
        CallError::Permanent { reason }
    }
}

/// Pulls the human-readable message out of a provider error body.
///
/// Both supported wire shapes use `{"error": {"message": ...}}`.
fn provider_error_message(body: &str) -> Option<String> {
    let parsed: JsonValue = serde_json::from_str(body).ok()?;
    parsed
        .get("error")?
        .get("message")?
        .as_str()
        .map(ToString::to_string)
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_string()
    } else {
        let cut = text
            .char_indices()
            .take_while(|(i, _)| *i < max)
            .last()
            .map_or(0, |(i, c)| i + c.len_utf8());
        format!("{}...", &text[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use serde_json::json;

    fn openai_descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(
            "openai-gpt4o",
            "gpt-4o",
            WireShape::OpenAiChat,
            "https://api.openai.com",
            "OPENAI_API_KEY",
        )
        .with_capabilities([Capability::Text, Capability::StructuredJson])
    }

    fn anthropic_descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(
            "anthropic-sonnet",
            "claude-sonnet-4-20250514",
            WireShape::AnthropicMessages,
            "https://api.anthropic.com",
            "ANTHROPIC_API_KEY",
        )
        .with_capabilities([Capability::Text, Capability::StructuredJson])
    }

    #[test]
    fn openai_request_layout() {
        let request = ModelRequest::new("Explain osmosis")
            .with_system("You are a tutor.")
            .with_temperature(0.2);
        let body = build_request(&openai_descriptor(), &request);

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Explain osmosis");
        let temperature = body["temperature"].as_f64().unwrap();
        assert!((temperature - 0.2).abs() < 1e-6);
        assert!(body.get("response_format").is_none());
    }

    #[test]
    fn openai_request_enables_json_mode_for_schemas() {
        let request =
            ModelRequest::new("Generate a quiz").with_output_schema(json!({"type": "object"}));
        let body = build_request(&openai_descriptor(), &request);

        assert_eq!(body["response_format"]["type"], "json_object");
        // The schema contract lands in the system message.
        let system = body["messages"][0]["content"].as_str().unwrap();
        assert!(system.contains("JSON document"));
    }

    #[test]
    fn anthropic_request_layout() {
        let request = ModelRequest::new("Explain osmosis")
            .with_system("You are a tutor.")
            .with_max_tokens(512);
        let body = build_request(&anthropic_descriptor(), &request);

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 512);
        assert_eq!(body["system"], "You are a tutor.");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn anthropic_request_defaults_max_tokens() {
        let body = build_request(&anthropic_descriptor(), &ModelRequest::new("hi"));
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn parses_openai_success() {
        let body = json!({
            "model": "gpt-4o",
            "choices": [{ "message": { "content": "Osmosis is..." }, "finish_reason": "stop" }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 40 }
        })
        .to_string();

        let response = parse_response(
            &openai_descriptor(),
            &ModelRequest::new("Explain osmosis"),
            StatusCode::OK,
            &body,
        )
        .unwrap();

        assert_eq!(response.content, "Osmosis is...");
        assert_eq!(response.usage.input_tokens, 12);
        assert_eq!(response.usage.output_tokens, 40);
        assert!(response.structured_output.is_none());
    }

    #[test]
    fn parses_anthropic_success() {
        let body = json!({
            "model": "claude-sonnet-4-20250514",
            "content": [{ "type": "text", "text": "Osmosis is..." }],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 15, "output_tokens": 30 }
        })
        .to_string();

        let response = parse_response(
            &anthropic_descriptor(),
            &ModelRequest::new("Explain osmosis"),
            StatusCode::OK,
            &body,
        )
        .unwrap();

        assert_eq!(response.content, "Osmosis is...");
        assert_eq!(response.usage.total(), 45);
    }

    #[test]
    fn structured_reply_is_validated() {
        let schema = json!({
            "type": "object",
            "properties": { "question": { "type": "string" } },
            "required": ["question"]
        });
        let request = ModelRequest::new("quiz").with_output_schema(schema);

        let good = json!({
            "choices": [{ "message": { "content": "{\"question\": \"What is osmosis?\"}" } }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })
        .to_string();
        let response =
            parse_response(&openai_descriptor(), &request, StatusCode::OK, &good).unwrap();
        assert_eq!(response.structured_output.unwrap()["question"], "What is osmosis?");

        let bad = json!({
            "choices": [{ "message": { "content": "{\"answer\": 42}" } }],
            "usage": { "prompt_tokens": 1, "completion_tokens": 1 }
        })
        .to_string();
        let err =
            parse_response(&openai_descriptor(), &request, StatusCode::OK, &bad).unwrap_err();
        assert!(matches!(err, CallError::InvalidResponse { .. }));
    }

    #[test]
    fn rate_limit_status_is_transient() {
        let err = classify_error_status(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "slow down"}}"#,
        );
        assert!(matches!(err, CallError::Transient { .. }));
        assert!(err.reason().contains("slow down"));
    }

    #[test]
    fn server_error_status_is_transient() {
        let err = classify_error_status(StatusCode::SERVICE_UNAVAILABLE, "overloaded");
        assert!(matches!(err, CallError::Transient { .. }));
    }

    #[test]
    fn client_error_status_is_permanent() {
        let err = classify_error_status(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "model not found"}}"#,
        );
        assert!(matches!(err, CallError::Permanent { .. }));
        assert!(err.reason().contains("model not found"));
    }

    #[test]
    fn content_filter_finish_is_permanent() {
        let body = json!({
            "choices": [{ "message": { "content": "" }, "finish_reason": "content_filter" }]
        })
        .to_string();
        let err = parse_response(
            &openai_descriptor(),
            &ModelRequest::new("x"),
            StatusCode::OK,
            &body,
        )
        .unwrap_err();
        assert!(matches!(err, CallError::Permanent { .. }));
    }

    #[test]
    fn garbage_body_is_invalid_response() {
        let err = parse_response(
            &anthropic_descriptor(),
            &ModelRequest::new("x"),
            StatusCode::OK,
            "<html>gateway error</html>",
        )
        .unwrap_err();
        assert!(matches!(err, CallError::InvalidResponse { .. }));
    }
}
