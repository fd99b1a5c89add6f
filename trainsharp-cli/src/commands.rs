//! CLI subcommand handlers.

use crate::CheckpointAction;
use crate::Commands;
use crate::ConfigAction;
use std::path::Path;
use trainsharp_core::{ExperimentConfig, Runtime, RuntimeConfig};
use trainsharp_ml::training::Checkpoint;
use trainsharp_ml::{CheckpointManager, split_indices};

/// Handle a CLI subcommand.
pub fn handle_command(command: Commands, config: &ExperimentConfig) -> anyhow::Result<()> {
    match command {
        Commands::Split {
            count,
            trainval,
            train,
            shuffle,
            output,
        } => handle_split(config, count, trainval, train, shuffle, &output),
        Commands::Config { action } => handle_config(action, config),
        Commands::Checkpoints { action } => handle_checkpoints(action, config),
    }
}

fn handle_split(
    config: &ExperimentConfig,
    count: usize,
    trainval: f64,
    train: f64,
    shuffle: bool,
    output: &Path,
) -> anyhow::Result<()> {
    let mut runtime = Runtime::init(&RuntimeConfig::from(config));
    let mut rng = runtime.rng("split");
    let partition = split_indices(count, trainval, train, shuffle, &mut rng)?;
    partition.save(output)?;

    println!("Saved split of {count} samples to {}", output.display());
    println!("  train: {}", partition.train().len());
    println!("  val:   {}", partition.val().len());
    println!("  test:  {}", partition.test().len());
    if shuffle {
        println!("  seed:  {}", runtime.seed());
    }
    Ok(())
}

fn handle_config(action: ConfigAction, config: &ExperimentConfig) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", config.show()?);
            Ok(())
        }
        ConfigAction::Save { path } => {
            let written = config.save(path.as_deref())?;
            println!("Saved configuration to: {}", written.display());
            Ok(())
        }
        ConfigAction::Load { path } => {
            let loaded = ExperimentConfig::load_dump(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", loaded.show()?);
            Ok(())
        }
    }
}

fn handle_checkpoints(action: CheckpointAction, config: &ExperimentConfig) -> anyhow::Result<()> {
    let manager = CheckpointManager::new(&config.model.model_root, &config.general.name);
    match action {
        CheckpointAction::List { json } => {
            let checkpoints = manager.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&checkpoints)?);
                return Ok(());
            }
            if checkpoints.is_empty() {
                println!(
                    "No checkpoints recorded in {}",
                    manager.experiment_dir().display()
                );
                return Ok(());
            }
            println!("Checkpoints ({}):", checkpoints.len());
            for c in &checkpoints {
                println!("{}", format_checkpoint_row(c));
            }
            Ok(())
        }
        CheckpointAction::Latest => {
            match manager.latest_epoch()? {
                Some(epoch) => println!("{epoch}"),
                None => println!(
                    "No checkpoints found in {}",
                    manager.experiment_dir().display()
                ),
            }
            Ok(())
        }
    }
}

fn format_checkpoint_row(c: &Checkpoint) -> String {
    let short_hash: String = c.sha256.chars().take(12).collect();
    format!(
        "  epoch {:>5}  {:<16} {:>10} bytes  {}  {}",
        c.epoch,
        c.network,
        c.size_bytes,
        short_hash,
        c.created_at.format("%Y-%m-%d %H:%M:%S"),
    )
}
