//! Polystore Common - Shared utilities and types
//!
//! This crate provides the ambient functionality used by every Polystore driver:
//! - Error types and handling
//! - Configuration management
//! - Metrics and tracing setup

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

pub use config::Config;
pub use error::{BackendError, Error, Result};
