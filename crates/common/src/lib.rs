//! Common types for the MCP authorization gateway

mod compare;
mod error;
mod redact;
mod secret;

pub use compare::constant_time_eq;
pub use error::{Error, Result};
pub use redact::redact;
pub use secret::Secret;
