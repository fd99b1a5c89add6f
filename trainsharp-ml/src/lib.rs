//! # trainsharp-ml — the training toolbox
//!
//! Dataset splitting and views, image augmentation, networks and their
//! initializers, the Adam optimizer, learning-rate schedules, checkpointing
//! and the [`Model`](training::Model) trait that ties them together.

pub mod data;
pub mod nn;
pub mod training;

pub use data::{Dataset, IndexPartition, PartitionName, SliceDataset, split_indices};
pub use nn::{Initializer, Network, NetworkHandle, Sequential};
pub use training::{CheckpointManager, LrScheduler, Model, Optimizer};
