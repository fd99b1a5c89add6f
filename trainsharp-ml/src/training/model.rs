//! The interface every trainable model implements.

use super::checkpoint::{CheckpointManager, RestoreReport};
use std::path::{Path, PathBuf};
use trainsharp_core::{Result, Runtime};

/// A model wrapping one or more networks with their optimizer and schedule.
///
/// A training loop drives it as `initialize` once, then `forward` followed by
/// `optimize` per batch; evaluation uses `inference`. Networks are registered
/// with the model's [`CheckpointManager`] during `initialize`, which gives
/// `save` and `restore` for free.
pub trait Model {
    type Input;
    type Target;
    type Output;

    fn name(&self) -> &str;

    fn checkpoints(&self) -> &CheckpointManager;

    /// Build networks, initialize weights and register them for checkpointing.
    fn initialize(&mut self, runtime: &mut Runtime) -> Result<()>;

    /// Run the networks on `input`, keeping what `optimize` needs.
    fn forward(&mut self, input: &Self::Input) -> Result<Self::Output>;

    /// Update the networks from the last `forward` against `target`.
    /// Returns the loss.
    fn optimize(&mut self, target: &Self::Target) -> Result<f64>;

    /// Run the networks on `input` without tracking anything for training.
    fn inference(&self, input: &Self::Input) -> Result<Self::Output>;

    fn save(&self, epoch: usize) -> Result<Vec<PathBuf>> {
        self.checkpoints().save_all(epoch)
    }

    /// See [`CheckpointManager::restore_from`].
    fn restore(&self, epoch: Option<usize>, path: Option<&Path>) -> Result<RestoreReport> {
        let report = self.checkpoints().restore_from(epoch, path)?;
        tracing::info!(
            model = self.name(),
            restored = report.restored(),
            failed = report.failures.len(),
            "Restore finished"
        );
        Ok(report)
    }
}
