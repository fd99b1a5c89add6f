//! Checkpoint management for registered networks.
//!
//! Every network registered under a name is saved to
//! `{model_root}/{experiment}/{epoch}-{name}.{ext}` as a bincode-encoded state
//! dict. Each write is recorded in `checkpoints.json` next to the files with a
//! SHA-256 of the bytes, which restore verifies.

use crate::nn::{NetworkHandle, StateDict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use trainsharp_core::persistence;
use trainsharp_core::{Result, SharpError};

pub const DEFAULT_EXTENSION: &str = "ckpt";
const MANIFEST_FILE: &str = "checkpoints.json";

/// A manifest entry for one written checkpoint file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub network: String,
    pub epoch: usize,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of restoring one network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// State loaded from this file; the handle is marked restored.
    Restored(PathBuf),
    /// No checkpoint at this convention path; the handle is unchanged.
    Missing(PathBuf),
    /// Neither an epoch nor a path was requested.
    Skipped,
}

/// Per-network results of a restore pass.
#[derive(Debug, Default)]
pub struct RestoreReport {
    pub outcomes: Vec<(String, RestoreOutcome)>,
    pub failures: Vec<(String, SharpError)>,
}

impl RestoreReport {
    pub fn restored(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, RestoreOutcome::Restored(_)))
            .count()
    }

    pub fn outcome(&self, name: &str) -> Option<&RestoreOutcome> {
        self.outcomes.iter().find(|(n, _)| n == name).map(|(_, o)| o)
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Split `"{epoch}-{name}.{ext}"` into its epoch and network name.
pub fn parse_checkpoint_file_name(file_name: &str, extension: &str) -> Option<(usize, String)> {
    let stem = file_name.strip_suffix(extension)?.strip_suffix('.')?;
    let (epoch, name) = stem.split_once('-')?;
    if name.is_empty() {
        return None;
    }
    Some((epoch.parse().ok()?, name.to_string()))
}

fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Whether `recorded` names the same file as `target`; only entries with a
/// matching file name are canonicalized.
fn same_file(recorded: &Path, target: &Path, canonical_target: Option<&Path>) -> bool {
    if recorded == target {
        return true;
    }
    if recorded.file_name() != target.file_name() {
        return false;
    }
    match (std::fs::canonicalize(recorded), canonical_target) {
        (Ok(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Tracks named networks of one experiment and saves/restores them.
pub struct CheckpointManager {
    model_root: PathBuf,
    experiment: String,
    extension: String,
    entries: Vec<(String, NetworkHandle)>,
}

impl CheckpointManager {
    pub fn new(model_root: impl Into<PathBuf>, experiment: impl Into<String>) -> Self {
        Self {
            model_root: model_root.into(),
            experiment: experiment.into(),
            extension: DEFAULT_EXTENSION.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn experiment_dir(&self) -> PathBuf {
        self.model_root.join(&self.experiment)
    }

    fn manifest_path(&self) -> PathBuf {
        self.experiment_dir().join(MANIFEST_FILE)
    }

    pub fn checkpoint_path(&self, epoch: usize, name: &str) -> PathBuf {
        self.experiment_dir()
            .join(format!("{epoch}-{name}.{}", self.extension))
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn handle(&self, name: &str) -> Option<&NetworkHandle> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, handle)| handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn register(&mut self, handle: NetworkHandle, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.handle(&name).is_some() {
            return Err(SharpError::DuplicateName(name));
        }
        tracing::debug!(network = %name, experiment = %self.experiment, "Registered network");
        self.entries.push((name, handle));
        Ok(())
    }

    /// Save every registered network for `epoch` and record them in the
    /// manifest. Returns the written paths in registration order.
    pub fn save_all(&self, epoch: usize) -> Result<Vec<PathBuf>> {
        for (_, handle) in &self.entries {
            handle.lock().check_layer_names()?;
        }

        let mut written = Vec::with_capacity(self.entries.len());
        let mut records = Vec::with_capacity(self.entries.len());

        for (name, handle) in &self.entries {
            let path = self.checkpoint_path(epoch, name);
            let state = handle.lock().state_dict();
            let bytes = bincode::serialize(&state)?;
            persistence::atomic_write(&path, &bytes)?;
            tracing::info!(network = %name, epoch, path = %path.display(), "Saved checkpoint");

            records.push(Checkpoint {
                id: uuid::Uuid::new_v4().to_string(),
                network: name.clone(),
                epoch,
                path: path.clone(),
                sha256: sha256_hex(&bytes),
                size_bytes: bytes.len() as u64,
                created_at: Utc::now(),
            });
            written.push(path);
        }

        if !records.is_empty() {
            let mut manifest = self.list()?;
            manifest.retain(|c| {
                c.epoch != epoch || !records.iter().any(|r| r.network == c.network)
            });
            manifest.extend(records);
            persistence::atomic_write_json(&self.manifest_path(), &manifest)?;
        }
        Ok(written)
    }

    /// Restore one network.
    ///
    /// `explicit_path` wins over `epoch`. A missing explicit file is a
    /// `NotFound` error; a missing convention file is reported as
    /// [`RestoreOutcome::Missing`] and leaves the network untouched.
    pub fn restore(
        &self,
        name: &str,
        epoch: Option<usize>,
        explicit_path: Option<&Path>,
    ) -> Result<RestoreOutcome> {
        let handle = self
            .handle(name)
            .ok_or_else(|| SharpError::not_found(format!("network {name} is not registered")))?;

        let path = match (explicit_path, epoch) {
            (Some(path), _) => {
                if !path.is_file() {
                    return Err(SharpError::not_found(format!(
                        "checkpoint {} does not exist",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            (None, Some(epoch)) => {
                let path = self.checkpoint_path(epoch, name);
                if !path.is_file() {
                    tracing::warn!(
                        network = %name,
                        epoch,
                        path = %path.display(),
                        "No checkpoint found, keeping current weights"
                    );
                    return Ok(RestoreOutcome::Missing(path));
                }
                path
            }
            (None, None) => return Ok(RestoreOutcome::Skipped),
        };

        let bytes = std::fs::read(&path)?;
        self.verify(&path, &bytes)?;
        let state: StateDict = bincode::deserialize(&bytes)?;
        handle.lock().load_state_dict(&state)?;
        handle.mark_restored();
        tracing::info!(network = %name, path = %path.display(), "Restored checkpoint");
        Ok(RestoreOutcome::Restored(path))
    }

    fn verify(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let manifest = self.list()?;
        let canonical = std::fs::canonicalize(path).ok();
        let Some(record) = manifest
            .iter()
            .rev()
            .find(|c| same_file(&c.path, path, canonical.as_deref()))
        else {
            return Ok(());
        };
        let actual = sha256_hex(bytes);
        if actual != record.sha256 {
            return Err(SharpError::checkpoint(format!(
                "{} is corrupted: expected sha256 {}, found {actual}",
                path.display(),
                record.sha256
            )));
        }
        Ok(())
    }

    /// Restore every registered network from `epoch`. Failures are logged and
    /// collected; they never stop the remaining networks from restoring.
    pub fn restore_all(&self, epoch: usize) -> RestoreReport {
        let mut report = RestoreReport::default();
        for (name, _) in &self.entries {
            match self.restore(name, Some(epoch), None) {
                Ok(outcome) => report.outcomes.push((name.clone(), outcome)),
                Err(e) => {
                    tracing::error!(network = %name, epoch, error = %e, "Failed to restore checkpoint");
                    report.failures.push((name.clone(), e));
                }
            }
        }
        report
    }

    /// Restore following run settings.
    ///
    /// A `restore_file` named `{epoch}-{name}.{ext}` restores that one network
    /// and is an error if missing or if its name is not registered. Otherwise a
    /// `restore_epoch` restores all networks; with neither, everything is skipped.
    pub fn restore_from(
        &self,
        restore_epoch: Option<usize>,
        restore_file: Option<&Path>,
    ) -> Result<RestoreReport> {
        if let Some(path) = restore_file {
            let (_, name) = path
                .file_name()
                .and_then(|f| f.to_str())
                .and_then(|f| parse_checkpoint_file_name(f, &self.extension))
                .ok_or_else(|| {
                    SharpError::invalid_argument(format!(
                        "{} is not named {{epoch}}-{{network}}.{}",
                        path.display(),
                        self.extension
                    ))
                })?;
            let outcome = self.restore(&name, None, Some(path))?;
            let mut report = RestoreReport::default();
            report.outcomes.push((name, outcome));
            return Ok(report);
        }

        match restore_epoch {
            Some(epoch) => Ok(self.restore_all(epoch)),
            None => Ok(RestoreReport {
                outcomes: self
                    .names()
                    .map(|name| (name.to_string(), RestoreOutcome::Skipped))
                    .collect(),
                failures: Vec::new(),
            }),
        }
    }

    /// Manifest entries for this experiment, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(persistence::load_json(&self.manifest_path())?.unwrap_or_default())
    }

    /// Highest saved epoch, from the manifest or, failing that, from the
    /// checkpoint file names in the experiment directory.
    pub fn latest_epoch(&self) -> Result<Option<usize>> {
        if let Some(epoch) = self.list()?.iter().map(|c| c.epoch).max() {
            return Ok(Some(epoch));
        }
        let dir = self.experiment_dir();
        if !dir.is_dir() {
            return Ok(None);
        }
        let mut latest = None;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let Some(file_name) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Some((epoch, _)) = parse_checkpoint_file_name(&file_name, &self.extension) {
                latest = latest.max(Some(epoch));
            }
        }
        Ok(latest)
    }
}

impl std::fmt::Debug for CheckpointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointManager")
            .field("experiment_dir", &self.experiment_dir())
            .field("extension", &self.extension)
            .field("networks", &self.names().collect::<Vec<_>>())
            .finish()
    }
}
