//! Core utilities shared by the kiln crates.
//!
//! This crate provides foundational types used across the renderer:
//! - Error types and result aliases
//! - Logging initialization
//! - Frame timing
//! - Renderer configuration

mod config;
mod error;
mod logging;
mod timer;

pub use config::{ConstantBudget, DescriptorBudget, RendererConfig};
pub use error::{Error, Result};
pub use logging::{DEFAULT_FILTER, init_logging, init_test_logging};
pub use timer::Timer;
