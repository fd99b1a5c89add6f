//! # trainsharp-core — plumbing shared by the trainsharp crates
//!
//! Error taxonomy, atomic persistence, layered experiment profiles, logging
//! setup, and the seed/device runtime.

pub mod config;
pub mod error;
pub mod logging;
pub mod options;
pub mod persistence;
pub mod runtime;
pub mod timer;

// Re-exports
pub use config::{ConfigOverrides, ExperimentConfig, load_config};
pub use error::{Result, SharpError};
pub use logging::{LogConfig, LogLevel, init_logging};
pub use options::{InitMethod, LrPolicy, OptimizerKind, Phase};
pub use runtime::{Device, Runtime, RuntimeConfig, SeedManager};
pub use timer::Timer;
