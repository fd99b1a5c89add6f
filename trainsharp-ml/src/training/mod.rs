//! Training infrastructure — optimizers, schedules, checkpoints, meters, monitors.

pub mod checkpoint;
pub mod lr_scheduler;
pub mod metrics;
pub mod model;
pub mod monitor;
pub mod optimizer;

pub use checkpoint::{Checkpoint, CheckpointManager, RestoreOutcome, RestoreReport};
pub use lr_scheduler::{LrScheduler, build_scheduler};
pub use metrics::{Meter, MultiClassAccMeter};
pub use model::Model;
pub use monitor::{JsonlMonitor, Monitor, Record, TracingMonitor};
pub use optimizer::{Adam, Optimizer, build_optimizer};
