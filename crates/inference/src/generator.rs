use anyhow::Result;
use caption_core::{CaptionModel, ImageTransform};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tch::{IndexOp, Tensor};
use tokenizer::{Vocabulary, UNK_TOKEN};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of decoding steps, the end marker included.
    pub max_len: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self { max_len: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionResult {
    pub text: String,
    /// Generated ids without the leading `<SOS>` and trailing `<EOS>`.
    pub token_ids: Vec<i64>,
}

/// Greedy captioning with a trained model and the vocabulary it was
/// trained with.
pub struct CaptionGenerator {
    model: Arc<CaptionModel>,
    vocab: Arc<Vocabulary>,
    transform: ImageTransform,
    config: GenerationConfig,
}

impl CaptionGenerator {
    pub fn new(model: Arc<CaptionModel>, vocab: Arc<Vocabulary>, config: GenerationConfig) -> Self {
        let transform = ImageTransform::from_config(&model.config);
        Self {
            model,
            vocab,
            transform,
            config,
        }
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn generate<P: AsRef<Path>>(&self, image_path: P) -> Result<CaptionResult> {
        let image = self.transform.load(image_path)?;
        self.generate_from_tensor(&image)
    }

    pub fn generate_from_image(&self, image: &RgbImage) -> Result<CaptionResult> {
        self.generate_from_tensor(&self.transform.apply(image))
    }

    /// image: [3, H, W], already transformed.
    pub fn generate_from_tensor(&self, image: &Tensor) -> Result<CaptionResult> {
        let token_ids = self.greedy_decode(image)?;
        let text = token_ids
            .iter()
            .map(|&id| self.vocab.token(id).unwrap_or(UNK_TOKEN))
            .collect::<Vec<_>>()
            .join(" ");

        debug!("Generated caption: '{}'", text);
        Ok(CaptionResult { text, token_ids })
    }

    /// Starts from `[<SOS>]`, re-runs the decoder over the whole prefix each
    /// step and appends the argmax of the last position. Stops at `<EOS>` or
    /// after `max_len` steps. Returned ids exclude `<SOS>` and `<EOS>`.
    pub fn greedy_decode(&self, image: &Tensor) -> Result<Vec<i64>> {
        let _guard = tch::no_grad_guard();
        let device = self.model.device();
        let eos = self.vocab.eos_index();

        let images = image.unsqueeze(0).to_device(device);
        let features = self.model.encoder().forward(&images);

        let mut generated = vec![self.vocab.sos_index()];
        for step in 0..self.config.max_len {
            let prefix = Tensor::from_slice(&generated)
                .view([1, generated.len() as i64])
                .to_device(device);
            let logits = self.model.decoder().forward_t(&features, &prefix, false);

            let next_token = logits.i((0, -1, ..)).argmax(0, false).int64_value(&[]);
            debug!("Step {}: generated token ID {}", step, next_token);

            generated.push(next_token);
            if next_token == eos {
                debug!("Generated EOS token, stopping generation");
                break;
            }
        }

        if generated.last() == Some(&eos) {
            generated.pop();
        }
        Ok(generated.split_off(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use caption_core::{Backbone, ModelConfig};
    use tch::{Device, Kind};

    fn generator(max_len: usize) -> CaptionGenerator {
        tch::manual_seed(3);
        let vocab = Vocabulary::build(&["a dog runs", "a dog runs fast"], 1);
        let config = ModelConfig {
            embed_size: 8,
            hidden_size: 8,
            vocab_size: vocab.size() as i64,
            backbone: Backbone::ResNet18,
            image_size: 32,
            ..Default::default()
        };
        let model = CaptionModel::new(&config, Device::Cpu).unwrap();
        CaptionGenerator::new(Arc::new(model), Arc::new(vocab), GenerationConfig { max_len })
    }

    #[test]
    fn test_zero_max_len_gives_empty_caption() {
        let generator = generator(0);
        let image = Tensor::rand([3, 32, 32], (Kind::Float, Device::Cpu));
        let result = generator.generate_from_tensor(&image).unwrap();
        assert_eq!(result.text, "");
        assert!(result.token_ids.is_empty());
    }

    #[test]
    fn test_greedy_decoding_is_deterministic() {
        let generator = generator(10);
        let image = Tensor::rand([3, 32, 32], (Kind::Float, Device::Cpu));
        let first = generator.generate_from_tensor(&image).unwrap();
        let second = generator.generate_from_tensor(&image).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_output_is_bounded_and_free_of_markers() {
        let generator = generator(4);
        let image = RgbImage::from_pixel(50, 40, image::Rgb([10, 200, 30]));
        let result = generator.generate_from_image(&image).unwrap();

        assert!(result.token_ids.len() <= 4);
        assert!(!result.token_ids.contains(&generator.vocab().eos_index()));
        assert_eq!(result.text.split_whitespace().count(), result.token_ids.len());
    }
}
