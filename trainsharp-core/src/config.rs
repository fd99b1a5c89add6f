//! Experiment configuration ("profile") for trainsharp runs.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! explicit config file -> environment -> CLI overrides. The resolved profile
//! can be shown, dumped next to the checkpoints, and loaded back from the dump.

use crate::error::{Result, SharpError};
use crate::options::{self, InitMethod, LrPolicy, OptimizerKind, Phase};
use figment::{
    Figment,
    error::{Actual, Kind},
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix, e.g. `TRAINSHARP_TRAIN__LR=0.001`.
pub const ENV_PREFIX: &str = "TRAINSHARP_";

/// Top-level configuration for an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub train: TrainConfig,
    #[serde(default)]
    pub test: TestConfig,
}

/// Experiment identity and process-wide settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Name of the experiment; also the checkpoint sub-directory.
    #[serde(default = "default_name")]
    pub name: String,
    /// Indices of the GPUs to use. Empty means CPU.
    #[serde(default = "default_gpu_ids")]
    pub gpu_ids: Vec<usize>,
    /// Manual random seed. A seed is drawn at startup when unset.
    #[serde(default)]
    pub manual_seed: Option<u64>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            gpu_ids: default_gpu_ids(),
            manual_seed: None,
        }
    }
}

fn default_name() -> String {
    "exp".to_string()
}

fn default_gpu_ids() -> Vec<usize> {
    vec![0]
}

/// Dataset and loader settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// Per-channel mean (R, G, B) of the images in the dataset.
    #[serde(default = "default_data_mean")]
    pub data_mean: [f32; 3],
    /// Per-channel std (R, G, B) of the images in the dataset.
    #[serde(default = "default_data_std")]
    pub data_std: [f32; 3],
    /// Image size for loading, before cropping (height, width).
    #[serde(default = "default_load_size")]
    pub load_size: [u32; 2],
    /// Image size of the network input (height, width).
    #[serde(default = "default_image_size")]
    pub image_size: [u32; 2],
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            data_mean: default_data_mean(),
            data_std: default_data_std(),
            load_size: default_load_size(),
            image_size: default_image_size(),
            batch_size: default_batch_size(),
            num_workers: default_num_workers(),
        }
    }
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_data_mean() -> [f32; 3] {
    [0.485, 0.456, 0.406]
}

fn default_data_std() -> [f32; 3] {
    [0.229, 0.224, 0.225]
}

fn default_load_size() -> [u32; 2] {
    [256, 256]
}

fn default_image_size() -> [u32; 2] {
    [224, 224]
}

fn default_batch_size() -> usize {
    64
}

fn default_num_workers() -> usize {
    1
}

/// Checkpoint location and weight setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Root folder for model checkpoints.
    #[serde(default = "default_model_root")]
    pub model_root: PathBuf,
    /// Explicit checkpoint file to restore from.
    #[serde(default)]
    pub restore_file: Option<PathBuf>,
    /// Epoch of the checkpoints to restore.
    #[serde(default)]
    pub restore_epoch: Option<usize>,
    #[serde(default)]
    pub weight_init: InitMethod,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_root: default_model_root(),
            restore_file: None,
            restore_epoch: None,
            weight_init: InitMethod::default(),
        }
    }
}

fn default_model_root() -> PathBuf {
    PathBuf::from("models")
}

/// Optimizer, schedule and training-loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    /// Base learning rate.
    #[serde(default = "default_lr")]
    pub lr: f64,
    /// First-moment decay for Adam.
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default)]
    pub lr_policy: LrPolicy,
    /// Factor applied to the learning rate on decay.
    #[serde(default = "default_lr_decay_factor")]
    pub lr_decay_factor: f64,
    /// Epochs at which (or period with which) the learning rate decays.
    #[serde(default = "default_lr_decay_epoch")]
    pub lr_decay_epoch: Vec<usize>,
    #[serde(default = "default_num_epoch")]
    pub num_epoch: usize,
    #[serde(default = "default_log_step")]
    pub log_step: usize,
    #[serde(default = "default_val_step")]
    pub val_step: usize,
    #[serde(default = "default_save_step")]
    pub save_step: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            phase: Phase::default(),
            optimizer: OptimizerKind::default(),
            lr: default_lr(),
            beta1: default_beta1(),
            lr_policy: LrPolicy::default(),
            lr_decay_factor: default_lr_decay_factor(),
            lr_decay_epoch: default_lr_decay_epoch(),
            num_epoch: default_num_epoch(),
            log_step: default_log_step(),
            val_step: default_val_step(),
            save_step: default_save_step(),
        }
    }
}

fn default_lr() -> f64 {
    1e-4
}

fn default_beta1() -> f64 {
    0.9
}

fn default_lr_decay_factor() -> f64 {
    0.1
}

fn default_lr_decay_epoch() -> Vec<usize> {
    vec![30]
}

fn default_num_epoch() -> usize {
    200
}

fn default_log_step() -> usize {
    20
}

fn default_val_step() -> usize {
    50
}

fn default_save_step() -> usize {
    50
}

/// Inference input/output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestConfig {
    /// Input file or directory.
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default = "default_output")]
    pub output: PathBuf,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            input: None,
            output: default_output(),
        }
    }
}

fn default_output() -> PathBuf {
    PathBuf::from("output")
}

impl ExperimentConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let name = &self.general.name;
        if name.is_empty() || name.contains(['/', '\\']) {
            return Err(SharpError::invalid_argument(format!(
                "experiment name {name:?} must be a non-empty single path component"
            )));
        }
        if self.data.batch_size == 0 {
            return Err(SharpError::invalid_argument("batch_size must be positive"));
        }
        if self.data.data_std.iter().any(|s| !(*s > 0.0)) {
            return Err(SharpError::invalid_argument(
                "data_std entries must be positive",
            ));
        }
        if self.data.image_size.contains(&0) || self.data.load_size.contains(&0) {
            return Err(SharpError::invalid_argument("image sizes must be non-zero"));
        }

        let train = &self.train;
        if !(train.lr.is_finite() && train.lr > 0.0) {
            return Err(SharpError::invalid_argument(format!(
                "lr must be a positive number, got {}",
                train.lr
            )));
        }
        if !(0.0..1.0).contains(&train.beta1) {
            return Err(SharpError::invalid_argument(format!(
                "beta1 must lie in [0, 1), got {}",
                train.beta1
            )));
        }
        if !(train.lr_decay_factor.is_finite() && train.lr_decay_factor > 0.0) {
            return Err(SharpError::invalid_argument(
                "lr_decay_factor must be a positive number",
            ));
        }
        let needs_decay_epoch = matches!(
            train.lr_policy,
            LrPolicy::Lambda | LrPolicy::Step | LrPolicy::MultiStep
        );
        if needs_decay_epoch && train.lr_decay_epoch.is_empty() {
            return Err(SharpError::invalid_argument(format!(
                "lr_decay_epoch must not be empty for the {} policy",
                train.lr_policy
            )));
        }
        if needs_decay_epoch && train.lr_decay_epoch.contains(&0) {
            return Err(SharpError::invalid_argument(
                "lr_decay_epoch entries must be positive",
            ));
        }
        if train.log_step == 0 || train.val_step == 0 || train.save_step == 0 {
            return Err(SharpError::invalid_argument(
                "log_step, val_step and save_step must be positive",
            ));
        }
        Ok(())
    }

    /// Directory holding this experiment's checkpoints and config dump.
    pub fn experiment_dir(&self) -> PathBuf {
        self.model.model_root.join(&self.general.name)
    }

    /// Default location of the human-readable config dump.
    pub fn default_dump_path(&self) -> PathBuf {
        self.experiment_dir()
            .join(format!("{}.cfg", self.general.name))
    }

    /// Flattened `key:value` pairs, with dotted keys for nested sections.
    pub fn entries(&self) -> Result<Vec<(String, String)>> {
        let value = serde_json::to_value(self)?;
        let mut out = Vec::new();
        flatten_value("", &value, &mut out);
        Ok(out)
    }

    /// Render the current config the way `show` prints it.
    pub fn show(&self) -> Result<String> {
        let mut text = String::from("--- current config ---\n");
        for (key, value) in self.entries()? {
            text.push_str(&key);
            text.push(':');
            text.push_str(&value);
            text.push('\n');
        }
        text.push_str("---");
        Ok(text)
    }

    /// Write the text dump and its binary twin, returning the text dump path.
    ///
    /// The binary copy lives at `{path}.bin` and is what [`Self::load_dump`]
    /// reads back. Parent directories are created.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.default_dump_path());

        let mut text = String::new();
        for (key, value) in self.entries()? {
            text.push_str(&format!("{key}:{value}\n"));
        }
        crate::persistence::atomic_write(&path, text.as_bytes())?;

        let encoded = bincode::serialize(self)?;
        crate::persistence::atomic_write(&binary_sibling(&path), &encoded)?;

        tracing::info!(path = %path.display(), "Saved current config");
        Ok(path)
    }

    /// Load a config previously written by [`Self::save`].
    ///
    /// Accepts either the text dump path or the `.bin` path itself.
    pub fn load_dump(path: &Path) -> Result<Self> {
        let binary = if path.extension().is_some_and(|ext| ext == "bin") {
            path.to_path_buf()
        } else {
            binary_sibling(path)
        };
        if !binary.exists() {
            return Err(SharpError::missing_path(&binary));
        }
        let bytes = std::fs::read(&binary)?;
        let config: Self = bincode::deserialize(&bytes)?;
        tracing::info!(path = %binary.display(), "Loaded config");
        Ok(config)
    }
}

fn binary_sibling(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".bin");
    PathBuf::from(os)
}

fn flatten_value(prefix: &str, value: &serde_json::Value, out: &mut Vec<(String, String)>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let key = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_value(&key, child, out);
            }
        }
        serde_json::Value::String(s) => out.push((prefix.to_string(), s.clone())),
        other => out.push((prefix.to_string(), other.to_string())),
    }
}

/// Dotted-key overrides applied on top of every other configuration layer.
///
/// Built from CLI flags, e.g. `ConfigOverrides::new().set("train.lr", 0.01)`.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    entries: Vec<(String, serde_json::Value)>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.entries.push((key.into(), value.into()));
        self
    }

    /// Set `key` only when `value` is present.
    pub fn set_opt<V: Into<serde_json::Value>>(self, key: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Path of the user-level config file, if a home directory can be resolved.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "trainsharp", "trainsharp")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Resolve the experiment configuration from every layer and validate it.
pub fn load_config(
    config_file: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<ExperimentConfig> {
    let mut figment = Figment::from(Serialized::defaults(ExperimentConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Explicit config file must exist when given
    if let Some(file) = config_file {
        if !file.exists() {
            return Err(SharpError::missing_path(file));
        }
        figment = figment.merge(Toml::file(file));
    }

    // Environment variables (TRAINSHARP_TRAIN__LR, TRAINSHARP_GENERAL__NAME, ...)
    figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

    for (key, value) in &overrides.entries {
        figment = figment.merge(Serialized::default(key, value));
    }

    let config: ExperimentConfig = figment.extract().map_err(config_error)?;
    config.validate()?;
    Ok(config)
}

/// Unknown option names surface as `UnsupportedOption`, whichever layer set them.
fn config_error(error: figment::Error) -> SharpError {
    if let Kind::InvalidValue(Actual::Str(value), expected) = &error.kind {
        if let Some(kind) = options::option_kind(expected) {
            tracing::debug!(path = ?error.path, "Unsupported option in configuration");
            return SharpError::unsupported(kind, value.clone());
        }
    }
    SharpError::Config(Box::new(error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = ExperimentConfig::default();
        config.validate().unwrap();
        assert_eq!(config.general.name, "exp");
        assert_eq!(config.general.gpu_ids, vec![0]);
        assert_eq!(config.model.weight_init, InitMethod::XavierNormal);
        assert_eq!(config.train.lr_decay_epoch, vec![30]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ExperimentConfig::default();
        config.train.lr = 0.0;
        assert!(matches!(
            config.validate(),
            Err(SharpError::InvalidArgument(_))
        ));

        let mut config = ExperimentConfig::default();
        config.train.lr_policy = LrPolicy::Step;
        config.train.lr_decay_epoch.clear();
        assert!(config.validate().is_err());

        let mut config = ExperimentConfig::default();
        config.train.lr_policy = LrPolicy::Exp;
        config.train.lr_decay_epoch.clear();
        config.validate().unwrap();

        let mut config = ExperimentConfig::default();
        config.general.name = "a/b".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_entries_are_dotted() {
        let config = ExperimentConfig::default();
        let entries = config.entries().unwrap();
        assert!(entries.contains(&("general.name".to_string(), "exp".to_string())));
        assert!(entries.contains(&("train.lr_policy".to_string(), "lambda".to_string())));
        assert!(entries.contains(&("model.restore_epoch".to_string(), "null".to_string())));
    }

    #[test]
    fn test_show_frames_entries() {
        let text = ExperimentConfig::default().show().unwrap();
        assert!(text.starts_with("--- current config ---\n"));
        assert!(text.ends_with("---"));
        assert!(text.contains("data.batch_size:64\n"));
    }

    #[test]
    fn test_save_and_load_dump_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut config = ExperimentConfig::default();
        config.model.model_root = dir.path().to_path_buf();
        config.general.name = "mnist".into();
        config.general.manual_seed = Some(7);
        config.train.lr_policy = LrPolicy::MultiStep;
        config.train.lr_decay_epoch = vec![10, 20];

        let path = config.save(None).unwrap();
        assert_eq!(path, dir.path().join("mnist").join("mnist.cfg"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("general.name:mnist\n"));
        assert!(text.contains("train.lr_decay_epoch:[10,20]\n"));

        let loaded = ExperimentConfig::load_dump(&path).unwrap();
        assert_eq!(loaded, config);
        let via_bin = ExperimentConfig::load_dump(&dir.path().join("mnist/mnist.cfg.bin")).unwrap();
        assert_eq!(via_bin, config);
    }

    #[test]
    fn test_load_dump_missing_is_io_error() {
        let dir = TempDir::new().unwrap();
        let err = ExperimentConfig::load_dump(&dir.path().join("none.cfg")).unwrap_err();
        assert!(matches!(err, SharpError::Io(_)));
    }

    #[test]
    fn test_load_config_layers() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "exp.toml",
                r#"
                [general]
                name = "from-file"
                gpu_ids = [1, 2]

                [train]
                lr = 0.01
                lr_policy = "step"
                "#,
            )?;
            jail.set_env("TRAINSHARP_TRAIN__LR", "0.02");
            jail.set_env("TRAINSHARP_MODEL__WEIGHT_INIT", "orthogonal");

            let overrides = ConfigOverrides::new().set("data.batch_size", 8u64);
            let config = load_config(Some(Path::new("exp.toml")), &overrides)
                .map_err(|e| e.to_string())?;

            assert_eq!(config.general.name, "from-file");
            assert_eq!(config.general.gpu_ids, vec![1, 2]);
            assert_eq!(config.train.lr, 0.02);
            assert_eq!(config.train.lr_policy, LrPolicy::Step);
            assert_eq!(config.model.weight_init, InitMethod::Orthogonal);
            assert_eq!(config.data.batch_size, 8);
            // untouched keys keep their defaults
            assert_eq!(config.train.num_epoch, 200);
            Ok(())
        });
    }

    #[test]
    fn test_load_config_rejects_unknown_policy() {
        Jail::expect_with(|jail| {
            jail.set_env("TRAINSHARP_TRAIN__LR_POLICY", "cosine");
            let err = load_config(None, &ConfigOverrides::new()).unwrap_err();
            assert!(matches!(
                err,
                SharpError::UnsupportedOption { kind: "learning rate policy", ref value } if value == "cosine"
            ));
            Ok(())
        });
    }

    #[test]
    fn test_load_config_file_options_follow_parse_rules() {
        Jail::expect_with(|jail| {
            jail.create_file("exp.toml", "[train]\noptimizer = \"Adam\"\nlr_policy = \"Step\"\n")?;
            let config = load_config(Some(Path::new("exp.toml")), &ConfigOverrides::new()).unwrap();
            assert_eq!(config.train.optimizer, OptimizerKind::Adam);
            assert_eq!(config.train.lr_policy, LrPolicy::Step);

            jail.create_file("bad.toml", "[model]\nweight_init = \"he\"\n")?;
            let err = load_config(Some(Path::new("bad.toml")), &ConfigOverrides::new()).unwrap_err();
            assert!(matches!(
                err,
                SharpError::UnsupportedOption { kind: "initialization method", ref value } if value == "he"
            ));
            Ok(())
        });
    }

    #[test]
    fn test_load_config_missing_file() {
        let result = load_config(Some(Path::new("/nonexistent/exp.toml")), &ConfigOverrides::new());
        assert!(matches!(result, Err(SharpError::Io(_))));
    }
}
