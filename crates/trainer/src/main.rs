use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

use caption_core::ModelConfig;
use trainer::TrainingConfig;

fn load_yaml_or_default<T: DeserializeOwned + Default>(path: &str) -> Result<T> {
    if Path::new(path).exists() {
        log::info!("Loading configuration from {}", path);
        let content = fs::read_to_string(path)?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path))
    } else {
        log::info!("{} not found, using defaults", path);
        Ok(T::default())
    }
}

fn main() -> Result<()> {
    env_logger::init();

    let model_config: ModelConfig = load_yaml_or_default("configs/model_config.yaml")?;
    let training_config: TrainingConfig = load_yaml_or_default("configs/training_config.yaml")?;

    let report = trainer::run(training_config, model_config)?;

    log::info!(
        "Training complete! Final loss {:.4}, checkpoint in {:?}",
        report.epoch_losses.last().copied().unwrap_or(f64::NAN),
        report.checkpoint_dir
    );

    Ok(())
}
