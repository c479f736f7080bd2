use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tch::Device;
use tokenizer::Vocabulary;

use crate::config::ModelConfig;
use crate::error::CheckpointError;
use crate::model::CaptionModel;
use crate::safetensors_util::{load_safetensors, save_safetensors};

pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;
pub const WEIGHTS_FILE: &str = "weights.safetensors";
pub const METADATA_FILE: &str = "checkpoint.json";
/// Backbone tensors, present only when the model had no external backbone
/// weights to reload from.
pub const BACKBONE_FILE: &str = "backbone.safetensors";

/// Everything besides the tensors: written next to `weights.safetensors`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub model: ModelConfig,
    pub vocabulary: Vocabulary,
    /// [`Vocabulary::signature`] at save time.
    pub vocabulary_signature: String,
}

impl Checkpoint {
    pub fn new(model: &ModelConfig, vocabulary: &Vocabulary) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            model: model.clone(),
            vocabulary: vocabulary.clone(),
            vocabulary_signature: vocabulary.signature(),
        }
    }

    /// Reads and validates `checkpoint.json` from `dir`.
    pub fn read<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let path = dir.as_ref().join(METADATA_FILE);
        let file = File::open(&path)
            .with_context(|| format!("Failed to open checkpoint metadata {:?}", path))?;
        let checkpoint: Checkpoint = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse checkpoint metadata {:?}", path))?;
        checkpoint.validate()?;
        Ok(checkpoint)
    }

    fn validate(&self) -> Result<(), CheckpointError> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                found: self.format_version,
                supported: CHECKPOINT_FORMAT_VERSION,
            });
        }

        let found = self.vocabulary.signature();
        if found != self.vocabulary_signature {
            return Err(CheckpointError::VocabularyMismatch {
                expected: self.vocabulary_signature.clone(),
                found,
            });
        }

        if self.model.vocab_size != self.vocabulary.size() as i64 {
            return Err(CheckpointError::VocabSizeMismatch {
                model: self.model.vocab_size,
                vocabulary: self.vocabulary.size(),
            });
        }
        Ok(())
    }

    /// Fails unless `vocabulary` assigns exactly the indices the checkpoint
    /// was trained with, e.g. one rebuilt from a corpus that has since changed.
    pub fn verify_vocabulary(&self, vocabulary: &Vocabulary) -> Result<(), CheckpointError> {
        let found = vocabulary.signature();
        if found != self.vocabulary_signature {
            return Err(CheckpointError::VocabularyMismatch {
                expected: self.vocabulary_signature.clone(),
                found,
            });
        }
        Ok(())
    }

    fn write<P: AsRef<Path>>(&self, dir: P) -> Result<()> {
        let file = File::create(dir.as_ref().join(METADATA_FILE))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Writes the trainable weights, model config and vocabulary to `dir`. A
/// backbone without `backbone_weights` is written too, since its random
/// initialization cannot be reproduced.
pub fn save_checkpoint<P: AsRef<Path>>(
    dir: P,
    model: &CaptionModel,
    vocabulary: &Vocabulary,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let checkpoint = Checkpoint::new(&model.config, vocabulary);
    checkpoint.validate()?;

    save_safetensors(model.var_store(), dir.join(WEIGHTS_FILE))?;
    let backbone = dir.join(BACKBONE_FILE);
    if model.config.backbone_weights.is_none() {
        save_safetensors(model.backbone_var_store(), &backbone)?;
    } else if backbone.exists() {
        std::fs::remove_file(&backbone)?;
    }
    checkpoint.write(dir)?;

    info!("Saved checkpoint to {:?}", dir);
    Ok(dir.to_path_buf())
}

/// Rebuilds the model from `dir` and restores every trainable tensor. The
/// backbone comes from `backbone.safetensors` in `dir` when present, else
/// from the weights path recorded in the model config.
pub fn load_checkpoint<P: AsRef<Path>>(dir: P, device: Device) -> Result<(CaptionModel, Vocabulary)> {
    let dir = dir.as_ref();
    let checkpoint = Checkpoint::read(dir)?;

    let backbone = dir.join(BACKBONE_FILE);
    let mut model = if checkpoint.model.backbone_weights.is_none() && backbone.exists() {
        let config = ModelConfig {
            backbone_weights: Some(backbone),
            ..checkpoint.model.clone()
        };
        let mut model = CaptionModel::new(&config, device)?;
        model.config = checkpoint.model.clone();
        model
    } else {
        CaptionModel::new(&checkpoint.model, device)?
    };
    let weights = dir.join(WEIGHTS_FILE);
    info!("Loading weights from {:?}", weights);
    let missing = load_safetensors(model.var_store_mut(), &weights)
        .with_context(|| format!("Failed to load checkpoint weights {:?}", weights))?;
    if !missing.is_empty() {
        return Err(CheckpointError::MissingTensors(missing).into());
    }

    Ok((model, checkpoint.vocabulary))
}
