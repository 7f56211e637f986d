//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the filesync core:
//! - Logging and tracing setup
//! - Pipeline configuration with defaults, environment loading and validation
//!
//! ## Overview
//!
//! Every other crate logs through `tracing` and reads its tunables from
//! [`PipelineConfig`](config::PipelineConfig). Hosts call
//! [`init_logging`](logging::init_logging) once at startup.

pub mod config;
pub mod error;
pub mod logging;

pub use config::PipelineConfig;
pub use error::{Error, Result};
