//! Provider backend abstraction.
//!
//! [`ProviderBackend`] is the seam the gateway drives: one implementation
//! per provider, selected via the descriptor catalog. [`HttpBackend`]
//! covers every provider whose API speaks a supported [`WireShape`];
//! tests substitute scripted implementations.

use crate::descriptor::{ProviderDescriptor, ProviderId, WireShape};
use crate::error::CallError;
use crate::model::{ModelRequest, ModelResponse};
use crate::wire;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Trait for provider backends.
///
/// Implementations perform exactly one network exchange per call and
/// classify every failure as a [`CallError`]. Per-attempt timeouts and
/// retries are the caller's concern.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    /// The provider this backend calls.
    fn provider(&self) -> &ProviderId;

    /// The model identifier sent on the wire.
    fn model(&self) -> &str;

    /// Performs one model call.
    ///
    /// # Errors
    ///
    /// Returns a classified [`CallError`] when the exchange fails.
    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, CallError>;
}

/// Errors constructing a backend from its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendInitError {
    /// The configured API key environment variable is not set.
    MissingApiKey { provider: ProviderId, env: String },
}

impl fmt::Display for BackendInitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey { provider, env } => {
                write!(f, "provider '{provider}' API key missing: {env} is not set")
            }
        }
    }
}

impl std::error::Error for BackendInitError {}

/// HTTP backend for providers speaking a supported wire shape.
pub struct HttpBackend {
    descriptor: Arc<ProviderDescriptor>,
    api_key: String,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Creates a backend with an explicit API key.
    #[must_use]
    pub fn new(descriptor: Arc<ProviderDescriptor>, api_key: impl Into<String>) -> Self {
        Self {
            descriptor,
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Creates a backend reading the API key from the descriptor's
    /// configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`BackendInitError::MissingApiKey`] when the variable is
    /// unset or empty.
    pub fn from_env(descriptor: Arc<ProviderDescriptor>) -> Result<Self, BackendInitError> {
        let api_key = std::env::var(&descriptor.api_key_env)
            .ok()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| BackendInitError::MissingApiKey {
                provider: descriptor.id.clone(),
                env: descriptor.api_key_env.clone(),
            })?;
        Ok(Self::new(descriptor, api_key))
    }

    /// Returns the descriptor this backend was built from.
    #[must_use]
    pub fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }
}

#[async_trait]
impl ProviderBackend for HttpBackend {
    fn provider(&self) -> &ProviderId {
        &self.descriptor.id
    }

    fn model(&self) -> &str {
        &self.descriptor.model
    }

    async fn call(&self, request: &ModelRequest) -> Result<ModelResponse, CallError> {
        let body = wire::build_request(&self.descriptor, request);
        let http = self
            .client
            .post(self.descriptor.endpoint_url())
            .json(&body);
        let http = match self.descriptor.wire {
            WireShape::OpenAiChat => http.bearer_auth(&self.api_key),
            WireShape::AnthropicMessages => http
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", "2023-06-01"),
        };

        let response = http.send().await.map_err(map_transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(map_transport_error)?;

        wire::parse_response(&self.descriptor, request, status, &text)
    }
}

/// Classifies a reqwest-level failure.
///
/// Connection-level failures escalate to the next candidate; timeouts
/// are retriable in place.
fn map_transport_error(error: reqwest::Error) -> CallError {
    if error.is_timeout() {
        CallError::Transient {
            reason: format!("request timed out: {error}"),
        }
    } else {
        CallError::ProviderUnavailable {
            reason: error.to_string(),
        }
    }
}
