//! Dataset plumbing: index splits, excerpt views and image augmentation.

pub mod dataset;
pub mod split;
pub mod transforms;

pub use dataset::{Dataset, SliceDataset};
pub use split::{IndexPartition, PartitionName, split_indices};
pub use transforms::{Compose, Image, Transform};
