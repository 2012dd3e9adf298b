//! pf-core: shared conversion types, errors, and configuration.
//!
//! This crate is the foundational dependency for the other pf-* crates. It
//! defines the validated request vocabulary (target format, mode, setting),
//! the unified error type, and the service configuration.

pub mod config;
pub mod error;
pub mod request;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use request::*;
