//! Provider abstraction for the brightpath AI gateway.
//!
//! This crate defines the normalized model-call contract shared by all
//! generative-AI providers, the descriptor catalog entries that describe
//! each provider's capabilities/costs/limits, and the wire adapters that
//! translate the normalized contract to and from each provider's native
//! API shape.
//!
//! Providers are polymorphic behind the [`ProviderBackend`] trait: a new
//! provider is added by implementing the trait (or reusing [`HttpBackend`]
//! with a supported wire shape) and registering a descriptor.

pub mod backend;
pub mod capability;
pub mod descriptor;
pub mod error;
pub mod model;
pub mod validate;
pub mod wire;

pub use backend::{BackendInitError, HttpBackend, ProviderBackend};
pub use capability::Capability;
pub use descriptor::{CostRate, ProviderDescriptor, ProviderId, RateLimits, WireShape};
pub use error::{CallError, CallErrorKind};
pub use model::{MessageRole, ModelMessage, ModelRequest, ModelResponse, TokenUsage};
