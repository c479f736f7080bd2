pub mod collate;
pub mod dataset;
pub mod loader;
pub mod train;

#[cfg(test)]
mod test_support;

pub use collate::{collate, Batch};
pub use dataset::{load_manifest, CaptionDataset, Manifest, Sample};
pub use loader::DataLoader;
pub use train::{caption_loss, Trainer, TrainingReport};

use anyhow::Result;
use caption_core::{parse_device, ImageTransform, ModelConfig};
use log::info;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory the manifest's image ids are resolved against.
    pub image_dir: PathBuf,
    /// `image,caption` file with a header line.
    pub manifest_path: PathBuf,
    /// `auto`, `cpu`, `cuda` or `cuda:N`.
    pub device: String,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Minimum corpus count for a token to enter the vocabulary.
    pub freq_threshold: u32,
    /// Word tokens kept per caption before `<SOS>`/`<EOS>` are added.
    pub max_caption_tokens: Option<usize>,
    pub shuffle: bool,
    pub seed: u64,
    /// Threads decoding images for a batch.
    pub num_workers: usize,
    /// Log the batch loss every this many batches; 0 disables it.
    pub log_every: usize,
    pub checkpoint_dir: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            image_dir: PathBuf::from("data/flickr8k/images"),
            manifest_path: PathBuf::from("data/flickr8k/captions.txt"),
            device: "auto".to_string(),
            batch_size: 32,
            epochs: 100,
            learning_rate: 3e-4,
            weight_decay: 0.0,
            freq_threshold: 5,
            max_caption_tokens: Some(50),
            shuffle: true,
            seed: 42,
            num_workers: 2,
            log_every: 100,
            checkpoint_dir: PathBuf::from("./checkpoints"),
        }
    }
}

/// Builds the dataset (and with it the vocabulary), trains for the
/// configured number of epochs and writes the checkpoint.
pub fn run(config: TrainingConfig, model_config: ModelConfig) -> Result<TrainingReport> {
    let device = parse_device(&config.device)?;
    info!("Using device: {:?}", device);
    tch::manual_seed(config.seed as i64);

    let dataset = CaptionDataset::new(
        &config.image_dir,
        &config.manifest_path,
        config.freq_threshold,
        config.max_caption_tokens,
        ImageTransform::from_config(&model_config),
    )?;

    let mut trainer = Trainer::new(model_config, config, dataset.vocab(), device)?;
    trainer.train(&dataset)
}
