//! trainsharp CLI — dataset splits, experiment configs and checkpoints.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use trainsharp_core::config::ConfigOverrides;
use trainsharp_core::{InitMethod, LogConfig, LogLevel, LrPolicy, OptimizerKind, Phase};

/// trainsharp: helpers for training neural networks
#[derive(Parser, Debug)]
#[command(name = "trainsharp", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Experiment name
    #[arg(long, global = true)]
    name: Option<String>,

    /// Random seed (drawn from 1..=10000 when omitted)
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// GPU indices, comma separated
    #[arg(long, global = true, value_delimiter = ',')]
    gpu_ids: Option<Vec<usize>>,

    /// Root folder for model checkpoints
    #[arg(long, global = true)]
    model_root: Option<PathBuf>,

    /// Weight initialization method
    #[arg(long, global = true)]
    weight_init: Option<InitMethod>,

    /// Run phase: train, val or test
    #[arg(long, global = true)]
    phase: Option<Phase>,

    /// Optimizer
    #[arg(long, global = true)]
    optimizer: Option<OptimizerKind>,

    /// Base learning rate
    #[arg(long, global = true)]
    lr: Option<f64>,

    /// Learning-rate policy: lambda, step, multistep, exp or plateau
    #[arg(long, global = true)]
    lr_policy: Option<LrPolicy>,

    /// Also write JSON logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Disable coloured output
    #[arg(long, global = true)]
    no_color: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Split a dataset's indices into train/val/test and save them
    Split {
        /// Number of samples in the dataset
        #[arg(short = 'n', long)]
        count: usize,
        /// Fraction of samples kept for train + val
        #[arg(long, default_value_t = 0.7)]
        trainval: f64,
        /// Fraction of train + val used for training
        #[arg(long, default_value_t = 0.9)]
        train: f64,
        /// Shuffle before splitting
        #[arg(long)]
        shuffle: bool,
        /// Output JSON file; its directory must exist
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Show, save or load the experiment configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Inspect saved checkpoints of the experiment
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Print the resolved configuration
    Show,
    /// Write the configuration dump (default: {model_root}/{name}/{name}.cfg)
    Save {
        /// Destination of the text dump
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Load and print a configuration dump
    Load {
        /// Text dump or its .bin twin
        path: PathBuf,
    },
}

#[derive(clap::Subcommand, Debug)]
enum CheckpointAction {
    /// List checkpoints recorded in the manifest
    List {
        /// Print the manifest as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the latest saved epoch
    Latest,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mut overrides = ConfigOverrides::new()
            .set_opt("general.name", self.name.clone())
            .set_opt("general.manual_seed", self.seed)
            .set_opt(
                "model.model_root",
                self.model_root
                    .as_ref()
                    .map(|p| p.to_string_lossy().into_owned()),
            )
            .set_opt("model.weight_init", self.weight_init.map(|m| m.as_str()))
            .set_opt("train.phase", self.phase.map(|p| p.as_str()))
            .set_opt("train.optimizer", self.optimizer.map(|o| o.as_str()))
            .set_opt("train.lr", self.lr)
            .set_opt("train.lr_policy", self.lr_policy.map(|p| p.as_str()));
        if let Some(ids) = &self.gpu_ids {
            overrides = overrides.set("general.gpu_ids", ids.clone());
        }
        overrides
    }

    fn log_config(&self) -> LogConfig {
        let level = match self.verbose {
            0 if self.quiet => LogLevel::Error,
            0 => LogLevel::Info,
            1 => LogLevel::Debug,
            _ => LogLevel::Trace,
        };
        LogConfig {
            name: "trainsharp".to_string(),
            level,
            colorized: !self.no_color,
            save_log: self.log_dir.is_some(),
            save_dir: self.log_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Human-readable stderr, plus JSON file logging when a log dir is given
    let _guard = trainsharp_core::init_logging(&cli.log_config())?;

    let config = trainsharp_core::load_config(cli.config.as_deref(), &cli.overrides())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    commands::handle_command(cli.command, &config)
}
