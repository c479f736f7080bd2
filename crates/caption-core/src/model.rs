use anyhow::{Context, Result};
use log::{info, warn};
use std::path::Path;
use tch::{nn, Device, Tensor};

use crate::config::ModelConfig;
use crate::decoder::Decoder;
use crate::encoder::Encoder;
use crate::error::CheckpointError;
use crate::safetensors_util::load_safetensors;

/// Encoder + decoder with their variable stores.
///
/// Trainable variables (`encoder.projection.*`, `decoder.*`) live in one
/// store and the backbone in another, frozen store. Optimizers and
/// checkpoints only ever see the trainable one.
pub struct CaptionModel {
    pub config: ModelConfig,
    vs: nn::VarStore,
    backbone_vs: nn::VarStore,
    encoder: Encoder,
    decoder: Decoder,
}

impl CaptionModel {
    pub fn new(config: &ModelConfig, device: Device) -> Result<Self> {
        let vs = nn::VarStore::new(device);
        let mut backbone_vs = nn::VarStore::new(device);

        let encoder = Encoder::new(&(vs.root() / "encoder"), &backbone_vs.root(), config);
        let decoder = Decoder::new(&(vs.root() / "decoder"), config);

        match &config.backbone_weights {
            Some(path) => load_backbone_weights(&mut backbone_vs, path)?,
            None => warn!(
                "No backbone weights configured for {:?}. Using random weights.",
                config.backbone
            ),
        }
        backbone_vs.freeze();

        Ok(Self {
            config: config.clone(),
            vs,
            backbone_vs,
            encoder,
            decoder,
        })
    }

    /// images: [batch, 3, H, W], captions: [batch, seq_len]
    /// Returns: logits [batch, seq_len + 1, vocab_size]
    pub fn forward_t(&self, images: &Tensor, captions: &Tensor, train: bool) -> Tensor {
        let features = self.encoder.forward(images);
        self.decoder.forward_t(&features, captions, train)
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn decoder(&self) -> &Decoder {
        &self.decoder
    }

    /// Store holding every trainable variable.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    pub fn var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.vs
    }

    pub fn backbone_var_store(&self) -> &nn::VarStore {
        &self.backbone_vs
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }
}

fn load_backbone_weights(vs: &mut nn::VarStore, path: &Path) -> Result<()> {
    info!("Loading backbone weights from {:?}", path);
    if path.extension().map_or(false, |ext| ext == "safetensors") {
        let missing = load_safetensors(vs, path)
            .with_context(|| format!("Failed to load backbone weights {:?}", path))?;
        if !missing.is_empty() {
            return Err(CheckpointError::MissingTensors(missing).into());
        }
    } else {
        vs.load(path)
            .with_context(|| format!("Failed to load backbone weights {:?}", path))?;
    }
    Ok(())
}
