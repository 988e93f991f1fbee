//! Request and response envelopes.
//!
//! A [`RequestEnvelope`] is created per feature-service call and carries
//! everything the dispatch loop needs: the normalized model request, the
//! capability requirements, and the cost/latency bounds. Exactly one
//! terminal outcome is produced per envelope: a [`ResponseEnvelope`] or a
//! typed error.

use brightpath_core::{RequestId, UserId};
use brightpath_provider::{Capability, ModelRequest, ProviderId, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::time::Duration;

/// Which feature service originated a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Interactive tutoring dialogue turns.
    Tutoring,
    /// Quiz generation.
    QuizGeneration,
    /// Free-form answer grading.
    AnswerGrading,
    /// Curriculum drafting.
    CurriculumDrafting,
    /// Feed ranking.
    FeedRanking,
}

impl TaskKind {
    /// Stable string form used in telemetry and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tutoring => "tutoring",
            Self::QuizGeneration => "quiz_generation",
            Self::AnswerGrading => "answer_grading",
            Self::CurriculumDrafting => "curriculum_drafting",
            Self::FeedRanking => "feed_ranking",
        }
    }
}

/// Default overall latency budget for a dispatch.
const DEFAULT_LATENCY_BUDGET: Duration = Duration::from_secs(30);

/// Expected completion size used when the caller supplies no estimate
/// and no max_tokens.
const DEFAULT_OUTPUT_TOKENS: u32 = 256;

/// One dispatchable AI request.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    /// Unique ID for this dispatch.
    pub request_id: RequestId,
    /// The user on whose behalf the call is made (budget accounting).
    pub user_id: UserId,
    /// Originating feature service.
    pub task: TaskKind,
    /// The normalized model request.
    pub request: ModelRequest,
    /// Capabilities a provider must advertise to be eligible.
    pub required_capabilities: BTreeSet<Capability>,
    /// Optional per-request cost ceiling in USD.
    pub cost_ceiling_usd: Option<f64>,
    /// Overall latency budget for the dispatch.
    pub latency_budget: Duration,
    /// Optional de-duplication key for retried calls.
    pub idempotency_key: Option<String>,
    /// Caller-supplied token estimate; a heuristic applies otherwise.
    pub estimated_tokens: Option<u32>,
}

impl RequestEnvelope {
    /// Creates an envelope for a model request.
    ///
    /// Every request requires [`Capability::Text`]; demanding an output
    /// schema adds [`Capability::StructuredJson`].
    #[must_use]
    pub fn new(user_id: UserId, task: TaskKind, request: ModelRequest) -> Self {
        let mut required_capabilities: BTreeSet<Capability> =
            [Capability::Text].into_iter().collect();
        if request.output_schema.is_some() {
            required_capabilities.insert(Capability::StructuredJson);
        }

        Self {
            request_id: RequestId::new(),
            user_id,
            task,
            request,
            required_capabilities,
            cost_ceiling_usd: None,
            latency_budget: DEFAULT_LATENCY_BUDGET,
            idempotency_key: None,
            estimated_tokens: None,
        }
    }

    /// Adds a required capability.
    #[must_use]
    pub fn with_required_capability(mut self, capability: Capability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    /// Sets the per-request cost ceiling.
    #[must_use]
    pub fn with_cost_ceiling_usd(mut self, ceiling: f64) -> Self {
        self.cost_ceiling_usd = Some(ceiling);
        self
    }

    /// Sets the overall latency budget.
    #[must_use]
    pub fn with_latency_budget(mut self, budget: Duration) -> Self {
        self.latency_budget = budget;
        self
    }

    /// Sets the idempotency key.
    #[must_use]
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Sets an explicit token estimate.
    #[must_use]
    pub fn with_estimated_tokens(mut self, estimated_tokens: u32) -> Self {
        self.estimated_tokens = Some(estimated_tokens);
        self
    }

    /// Token estimate used for rate-limit debits and cost projection.
    ///
    /// Falls back to a chars/4 heuristic over the prompt material plus
    /// the expected completion size.
    #[must_use]
    pub fn estimate_tokens(&self) -> u32 {
        if let Some(explicit) = self.estimated_tokens {
            return explicit.max(1);
        }

        let prompt_chars = self.request.prompt.len()
            + self.request.system.as_deref().map_or(0, str::len)
            + self
                .request
                .history
                .iter()
                .map(|m| m.content.len())
                .sum::<usize>();
        let input_tokens = prompt_chars / 4;
        let output_tokens = self.request.max_tokens.unwrap_or(DEFAULT_OUTPUT_TOKENS) as usize;

        u32::try_from(input_tokens + output_tokens)
            .unwrap_or(u32::MAX)
            .max(1)
    }
}

/// The terminal success outcome of a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// The request this responds to.
    pub request_id: RequestId,
    /// Provider that produced the response.
    pub provider: ProviderId,
    /// Model that produced the response.
    pub model: String,
    /// Generated content.
    pub content: String,
    /// Structured output, when a schema was demanded.
    pub structured_output: Option<JsonValue>,
    /// Token usage reported by the provider.
    pub usage: TokenUsage,
    /// Actual cost incurred.
    pub cost_usd: f64,
    /// End-to-end dispatch latency in milliseconds.
    pub latency_ms: u64,
    /// Total attempts made across the chain.
    pub attempts: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_requires_text_by_default() {
        let envelope = RequestEnvelope::new(
            UserId::new(),
            TaskKind::Tutoring,
            ModelRequest::new("Explain photosynthesis"),
        );
        assert!(envelope.required_capabilities.contains(&Capability::Text));
        assert!(!envelope
            .required_capabilities
            .contains(&Capability::StructuredJson));
    }

    #[test]
    fn output_schema_requires_structured_json() {
        let envelope = RequestEnvelope::new(
            UserId::new(),
            TaskKind::QuizGeneration,
            ModelRequest::new("quiz").with_output_schema(json!({"type": "object"})),
        );
        assert!(envelope
            .required_capabilities
            .contains(&Capability::StructuredJson));
    }

    #[test]
    fn explicit_estimate_wins() {
        let envelope = RequestEnvelope::new(
            UserId::new(),
            TaskKind::AnswerGrading,
            ModelRequest::new("grade this"),
        )
        .with_estimated_tokens(5000);
        assert_eq!(envelope.estimate_tokens(), 5000);
    }

    #[test]
    fn heuristic_estimate_scales_with_prompt() {
        let short = RequestEnvelope::new(
            UserId::new(),
            TaskKind::Tutoring,
            ModelRequest::new("hi"),
        );
        let long = RequestEnvelope::new(
            UserId::new(),
            TaskKind::Tutoring,
            ModelRequest::new("x".repeat(4000)),
        );
        assert!(long.estimate_tokens() > short.estimate_tokens());
        // Expected completion size is part of the estimate.
        assert!(short.estimate_tokens() >= DEFAULT_OUTPUT_TOKENS);
    }

    #[test]
    fn task_kind_string_form() {
        assert_eq!(TaskKind::QuizGeneration.as_str(), "quiz_generation");
        assert_eq!(TaskKind::FeedRanking.as_str(), "feed_ranking");
    }
}
