//! Process runtime: seed management and device selection.
//!
//! Replaces ambient global state with an explicit value created once at
//! startup and handed to whatever needs randomness or a device.

use crate::config::ExperimentConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

/// Compute device a run is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Cuda(usize),
}

impl Device {
    /// The first listed GPU, or the CPU when none are listed.
    pub fn from_gpu_ids(gpu_ids: &[usize]) -> Self {
        gpu_ids.first().map_or(Self::Cpu, |id| Self::Cuda(*id))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => f.write_str("cpu"),
            Self::Cuda(id) => write!(f, "cuda:{id}"),
        }
    }
}

/// Startup settings for the process runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub manual_seed: Option<u64>,
    pub gpu_ids: Vec<usize>,
}

impl From<&ExperimentConfig> for RuntimeConfig {
    fn from(config: &ExperimentConfig) -> Self {
        Self {
            manual_seed: config.general.manual_seed,
            gpu_ids: config.general.gpu_ids.clone(),
        }
    }
}

/// Seed manager for reproducible runs.
///
/// Every component asking for randomness gets its own stream derived from the
/// global seed and the component name, so adding a consumer never shifts the
/// numbers another consumer sees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedManager {
    pub global_seed: u64,
    pub component_seeds: HashMap<String, u64>,
}

impl SeedManager {
    pub fn new(global_seed: u64) -> Self {
        Self {
            global_seed,
            component_seeds: HashMap::new(),
        }
    }

    /// Use `manual_seed` if given, otherwise draw one from `1..=10000`.
    pub fn resolve(manual_seed: Option<u64>) -> Self {
        let seed = manual_seed.unwrap_or_else(|| rand::thread_rng().gen_range(1..=10_000));
        Self::new(seed)
    }

    pub fn get_seed(&mut self, component: &str) -> u64 {
        let global = self.global_seed;
        *self
            .component_seeds
            .entry(component.to_string())
            .or_insert_with(|| derive_seed(global, component))
    }

    /// Fresh RNG for `component`, reproducible across runs with the same seed.
    pub fn rng(&mut self, component: &str) -> StdRng {
        StdRng::seed_from_u64(self.get_seed(component))
    }
}

fn derive_seed(global_seed: u64, component: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(global_seed.to_le_bytes());
    hasher.update(component.as_bytes());
    let digest = hasher.finalize();
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Process-wide runtime created once at startup.
#[derive(Debug, Clone)]
pub struct Runtime {
    seeds: SeedManager,
    device: Device,
}

impl Runtime {
    pub fn init(config: &RuntimeConfig) -> Self {
        let seeds = SeedManager::resolve(config.manual_seed);
        let device = Device::from_gpu_ids(&config.gpu_ids);
        tracing::info!(seed = seeds.global_seed, %device, "Initialized runtime");
        Self { seeds, device }
    }

    pub fn seed(&self) -> u64 {
        self.seeds.global_seed
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn rng(&mut self, component: &str) -> StdRng {
        self.seeds.rng(component)
    }
}
