//! REST client for the CommHub backend
//!
//! Provides the wire types consumed by the unified inbox engine, the
//! push-event payloads, and the [`HubBackend`] trait the engine is written
//! against.

pub mod backend;
pub mod client;
pub mod error;
pub mod types;

pub use backend::HubBackend;
pub use client::HubClient;
pub use error::{ApiError, ApiResult};
pub use types::*;
