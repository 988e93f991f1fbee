//! Core domain types and utilities for the brightpath platform.
//!
//! This crate provides the foundational types and error handling shared
//! by the learning platform's services, including the AI gateway.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{RequestId, UserId};
