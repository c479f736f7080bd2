use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tch::Device;
use tracing::info;

pub mod generator;

pub use generator::{CaptionGenerator, CaptionResult, GenerationConfig};

/// Loads the checkpoint in `dir` and wraps it in a generator.
pub fn load_generator(dir: &Path, device: Device, config: GenerationConfig) -> Result<CaptionGenerator> {
    info!("Loading checkpoint from {:?}", dir);
    let (model, vocab) = caption_core::load_checkpoint(dir, device)
        .with_context(|| format!("Failed to load checkpoint at {:?}", dir))?;
    info!(
        "Loaded model ({:?} backbone, vocabulary size {})",
        model.config.backbone,
        vocab.size()
    );

    Ok(CaptionGenerator::new(Arc::new(model), Arc::new(vocab), config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use caption_core::{safetensors_util::save_safetensors, save_checkpoint, Backbone, CaptionModel, ModelConfig};
    use image::{Rgb, RgbImage};
    use tokenizer::Vocabulary;

    #[test]
    fn test_loaded_generator_matches_saved_model() {
        let dir = tempfile::tempdir().unwrap();
        let vocab = Vocabulary::build(&["a dog runs", "a cat sleeps"], 1);
        let mut config = ModelConfig {
            embed_size: 8,
            hidden_size: 8,
            vocab_size: vocab.size() as i64,
            backbone: Backbone::ResNet18,
            image_size: 32,
            ..Default::default()
        };

        let backbone = dir.path().join("backbone.safetensors");
        let seed = CaptionModel::new(&config, Device::Cpu).unwrap();
        save_safetensors(seed.backbone_var_store(), &backbone).unwrap();
        config.backbone_weights = Some(backbone);

        let model = CaptionModel::new(&config, Device::Cpu).unwrap();
        let ckpt = dir.path().join("ckpt");
        save_checkpoint(&ckpt, &model, &vocab).unwrap();

        let image_path = dir.path().join("photo.png");
        RgbImage::from_pixel(48, 48, Rgb([200, 40, 90])).save(&image_path).unwrap();

        let expected = CaptionGenerator::new(Arc::new(model), Arc::new(vocab), GenerationConfig::default())
            .generate(&image_path)
            .unwrap();
        let loaded = load_generator(&ckpt, Device::Cpu, GenerationConfig::default()).unwrap();
        assert_eq!(loaded.generate(&image_path).unwrap(), expected);
    }

    #[test]
    fn test_missing_checkpoint_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_generator(dir.path(), Device::Cpu, GenerationConfig::default()).is_err());
    }
}
