use anyhow::{ensure, Result};
use caption_core::{save_checkpoint, CaptionModel, ModelConfig};
use log::info;
use std::path::PathBuf;
use tch::{nn, nn::OptimizerConfig, Device, Reduction, Tensor};
use tokenizer::Vocabulary;

use crate::collate::Batch;
use crate::dataset::CaptionDataset;
use crate::loader::DataLoader;
use crate::TrainingConfig;

#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Mean batch loss of every epoch, in order.
    pub epoch_losses: Vec<f64>,
    pub checkpoint_dir: PathBuf,
}

/// Next-token cross entropy.
///
/// logits: [batch, seq_len, vocab] from the decoder fed `captions[:, :-1]`
/// captions: [batch, seq_len]
///
/// Logits at position t >= 1 are scored against `captions[:, t]`; the image
/// step is not scored and `pad_index` targets are ignored.
pub fn caption_loss(logits: &Tensor, captions: &Tensor, pad_index: i64) -> Result<Tensor> {
    let (b, t, v) = logits.size3()?;
    let (cb, ct) = captions.size2()?;
    ensure!(
        b == cb && t == ct && t >= 2,
        "logits {:?} do not line up with captions {:?}",
        logits.size(),
        captions.size()
    );

    let logits_flat = logits.narrow(1, 1, t - 1).reshape([-1, v]);
    let target_flat = captions.narrow(1, 1, t - 1).reshape([-1]);

    Ok(logits_flat.cross_entropy_loss::<Tensor>(&target_flat, None, Reduction::Mean, pad_index, 0.0))
}

pub struct Trainer {
    config: TrainingConfig,
    model: CaptionModel,
    optimizer: nn::Optimizer,
    device: Device,
    pad_index: i64,
}

impl Trainer {
    /// Builds a fresh model sized for `vocab`. Only the trainable store
    /// (encoder projection + decoder) is handed to the optimizer.
    pub fn new(
        mut model_config: ModelConfig,
        trainer_config: TrainingConfig,
        vocab: &Vocabulary,
        device: Device,
    ) -> Result<Self> {
        model_config.vocab_size = vocab.size() as i64;
        let model = CaptionModel::new(&model_config, device)?;

        let optimizer = nn::AdamW {
            wd: trainer_config.weight_decay,
            ..Default::default()
        }
        .build(model.var_store(), trainer_config.learning_rate)?;

        Ok(Self {
            config: trainer_config,
            model,
            optimizer,
            device,
            pad_index: vocab.pad_index(),
        })
    }

    /// One forward/backward/update on `batch`. Returns the loss.
    pub fn train_step(&mut self, batch: &Batch) -> Result<f64> {
        let (_, len) = batch.captions.size2()?;
        let inputs = batch.captions.narrow(1, 0, len - 1);

        let logits = self.model.forward_t(&batch.images, &inputs, true);
        let loss = caption_loss(&logits, &batch.captions, self.pad_index)?;

        self.optimizer.backward_step(&loss);
        Ok(loss.double_value(&[]))
    }

    /// Runs every configured epoch over `dataset`, then writes the
    /// checkpoint. Nothing is saved before the last epoch finishes.
    pub fn train(&mut self, dataset: &CaptionDataset) -> Result<TrainingReport> {
        ensure!(!dataset.is_empty(), "dataset has no samples");

        let mut loader = DataLoader::new(
            dataset,
            self.config.batch_size,
            self.config.shuffle,
            self.config.seed,
            self.config.num_workers,
        )?;
        let num_batches = loader.num_batches();

        info!("Starting training with configuration: {:?}", self.config);

        let mut epoch_losses = Vec::with_capacity(self.config.epochs);
        for epoch in 0..self.config.epochs {
            let mut epoch_loss = 0.0;

            for (batch_idx, indices) in loader.epoch().into_iter().enumerate() {
                let batch = loader.load_batch(&indices)?.to_device(self.device);
                let loss_val = self.train_step(&batch)?;
                epoch_loss += loss_val;

                if self.config.log_every > 0 && batch_idx % self.config.log_every == 0 {
                    info!(
                        "Epoch {} | Batch {}/{} | Loss: {:.4}",
                        epoch, batch_idx, num_batches, loss_val
                    );
                }
            }

            let mean = epoch_loss / num_batches as f64;
            info!("Epoch {} Average Loss: {:.4}", epoch, mean);
            epoch_losses.push(mean);
        }

        let checkpoint_dir = save_checkpoint(&self.config.checkpoint_dir, &self.model, dataset.vocab())?;

        Ok(TrainingReport {
            epoch_losses,
            checkpoint_dir,
        })
    }

    pub fn model(&self) -> &CaptionModel {
        &self.model
    }

    pub fn into_model(self) -> CaptionModel {
        self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collate::collate;
    use crate::dataset::Sample;
    use crate::test_support::write_fixture;
    use caption_core::{load_checkpoint, Backbone, ImageTransform};
    use tch::Kind;

    fn tiny_model_config() -> ModelConfig {
        ModelConfig {
            embed_size: 16,
            hidden_size: 16,
            dropout: 0.0,
            backbone: Backbone::ResNet18,
            image_size: 32,
            normalize: false,
            ..Default::default()
        }
    }

    fn config(checkpoint_dir: PathBuf) -> TrainingConfig {
        TrainingConfig {
            batch_size: 2,
            epochs: 3,
            learning_rate: 1e-2,
            num_workers: 1,
            log_every: 1,
            checkpoint_dir,
            ..Default::default()
        }
    }

    #[test]
    fn test_loss_ignores_padding() {
        let vocab = 5;
        let logits = Tensor::randn([1, 4, vocab], (Kind::Float, Device::Cpu));
        let captions = Tensor::from_slice(&[1i64, 4, 2, 0]).view([1, 4]);
        let loss = caption_loss(&logits, &captions, 0).unwrap();

        // Only positions 1 and 2 carry real targets.
        let expected = logits
            .narrow(1, 1, 2)
            .reshape([-1, vocab])
            .cross_entropy_for_logits(&Tensor::from_slice(&[4i64, 2]));
        assert!(loss.allclose(&expected, 1e-5, 1e-6, false));

        let changed = logits.copy();
        let _ = changed.narrow(1, 3, 1).fill_(100.0);
        let loss_changed = caption_loss(&changed, &captions, 0).unwrap();
        assert!(loss.allclose(&loss_changed, 1e-5, 1e-6, false));
    }

    #[test]
    fn test_loss_rejects_misaligned_shapes() {
        let logits = Tensor::randn([1, 5, 4], (Kind::Float, Device::Cpu));
        let captions = Tensor::from_slice(&[1i64, 3, 2]).view([1, 3]);
        assert!(caption_loss(&logits, &captions, 0).is_err());
    }

    #[test]
    fn test_two_sample_forward_has_vocabulary_width() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), &[("same.png", "a dog runs"), ("same.png", "a dog runs fast")]);
        let dataset = CaptionDataset::new(dir.path(), manifest, 1, None, ImageTransform::new(32, None)).unwrap();
        assert_eq!(dataset.vocab().size(), 8);

        let trainer = Trainer::new(tiny_model_config(), config(dir.path().join("ckpt")), dataset.vocab(), Device::Cpu).unwrap();
        let samples: Vec<Sample> = (0..2).map(|i| dataset.item(i).unwrap()).collect();
        let batch = collate(samples, dataset.vocab().pad_index()).unwrap();
        let (_, len) = batch.captions.size2().unwrap();

        let logits = trainer.model().forward_t(&batch.images, &batch.captions.narrow(1, 0, len - 1), false);
        assert_eq!(logits.size(), vec![2, len, 8]);
    }

    #[test]
    fn test_train_step_updates_only_trainable_weights() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), &[("a.png", "a dog runs"), ("b.png", "a cat sleeps")]);
        let dataset = CaptionDataset::new(dir.path(), manifest, 1, None, ImageTransform::new(32, None)).unwrap();
        let mut trainer = Trainer::new(tiny_model_config(), config(dir.path().join("ckpt")), dataset.vocab(), Device::Cpu).unwrap();

        let backbone_before = trainer.model().backbone_var_store().variables()["conv1.weight"].copy();
        let linear_before = trainer.model().var_store().variables()["decoder.linear.weight"].copy();

        let samples: Vec<Sample> = (0..2).map(|i| dataset.item(i).unwrap()).collect();
        let batch = collate(samples, dataset.vocab().pad_index()).unwrap();
        trainer.train_step(&batch).unwrap();

        let backbone_after = trainer.model().backbone_var_store().variables();
        let trainable_after = trainer.model().var_store().variables();
        assert!(backbone_before.equal(&backbone_after["conv1.weight"]));
        assert!(!linear_before.equal(&trainable_after["decoder.linear.weight"]));
    }

    #[test]
    fn test_training_reduces_loss_and_writes_checkpoint() {
        tch::manual_seed(0);
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), &[("a.png", "a dog runs"), ("b.png", "a cat sleeps on a mat")]);
        let dataset = CaptionDataset::new(dir.path(), manifest, 1, None, ImageTransform::new(32, None)).unwrap();

        let mut trainer = Trainer::new(
            tiny_model_config(),
            TrainingConfig {
                epochs: 20,
                ..config(dir.path().join("ckpt"))
            },
            dataset.vocab(),
            Device::Cpu,
        )
        .unwrap();
        let report = trainer.train(&dataset).unwrap();

        assert_eq!(report.epoch_losses.len(), 20);
        assert!(report.epoch_losses.last().unwrap() < report.epoch_losses.first().unwrap());

        let (model, vocab) = load_checkpoint(&report.checkpoint_dir, Device::Cpu).unwrap();
        assert_eq!(vocab.signature(), dataset.vocab().signature());
        assert_eq!(model.config.vocab_size, vocab.size() as i64);
    }

    #[test]
    fn test_reloaded_model_matches_trained_random_backbone() {
        tch::manual_seed(1);
        let dir = tempfile::tempdir().unwrap();
        let manifest = write_fixture(dir.path(), &[("a.png", "a dog runs"), ("b.png", "a cat sleeps")]);
        let dataset = CaptionDataset::new(dir.path(), manifest, 1, None, ImageTransform::new(32, None)).unwrap();

        let model_config = tiny_model_config();
        assert!(model_config.backbone_weights.is_none());
        let mut trainer = Trainer::new(model_config, config(dir.path().join("ckpt")), dataset.vocab(), Device::Cpu).unwrap();
        let report = trainer.train(&dataset).unwrap();

        tch::manual_seed(99);
        let (loaded, _) = load_checkpoint(&report.checkpoint_dir, Device::Cpu).unwrap();

        let samples: Vec<Sample> = (0..2).map(|i| dataset.item(i).unwrap()).collect();
        let batch = collate(samples, dataset.vocab().pad_index()).unwrap();
        let trained = trainer.model().forward_t(&batch.images, &batch.captions, false);
        let restored = loaded.forward_t(&batch.images, &batch.captions, false);
        assert!(trained.allclose(&restored, 1e-5, 1e-6, false));
    }
}
