use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tch::{nn, nn::ModuleT, vision::resnet, Device};

/// Pretrained feature extractor placed in front of the projection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    ResNet18,
    ResNet34,
    ResNet50,
}

impl Backbone {
    /// Width of the pooled feature vector the backbone emits.
    pub fn feature_dim(&self) -> i64 {
        match self {
            Backbone::ResNet18 | Backbone::ResNet34 => 512,
            Backbone::ResNet50 => 2048,
        }
    }

    /// Builds the network without its classification head. Variables are
    /// created at the root of `p` so torchvision weight names load directly.
    pub fn build(&self, p: &nn::Path) -> nn::FuncT<'static> {
        match self {
            Backbone::ResNet18 => resnet::resnet18_no_final_layer(p),
            Backbone::ResNet34 => resnet::resnet34_no_final_layer(p),
            Backbone::ResNet50 => {
                let net = resnet::resnet50_no_final_layer(p);
                nn::func_t(move |xs, train| net.forward_t(xs, train))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Size of the image embedding and of the token embeddings.
    pub embed_size: i64,
    /// LSTM hidden state size.
    pub hidden_size: i64,
    /// Number of stacked LSTM layers.
    pub num_layers: i64,
    /// Dropout on token embeddings, training only.
    pub dropout: f64,
    /// Size of the vocabulary. Always overwritten from the built vocabulary.
    pub vocab_size: i64,
    pub backbone: Backbone,
    /// `.ot` or `.safetensors` file with pretrained backbone weights.
    /// Without it the backbone keeps its random initialization.
    pub backbone_weights: Option<PathBuf>,
    /// Square side the images are resized to before the encoder.
    pub image_size: u32,
    /// Apply ImageNet mean/std normalization after scaling to [0, 1].
    pub normalize: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embed_size: 256,
            hidden_size: 256,
            num_layers: 1,
            dropout: 0.5,
            vocab_size: 4,
            backbone: Backbone::ResNet50,
            backbone_weights: None,
            image_size: 224,
            normalize: true,
        }
    }
}

/// Parses `auto`, `cpu`, `cuda` or `cuda:N`.
pub fn parse_device(spec: &str) -> Result<Device> {
    let spec = spec.trim().to_lowercase();
    match spec.as_str() {
        "auto" => Ok(Device::cuda_if_available()),
        "cpu" => Ok(Device::Cpu),
        "cuda" => Ok(Device::Cuda(0)),
        other => match other.strip_prefix("cuda:") {
            Some(idx) => match idx.parse::<usize>() {
                Ok(idx) => Ok(Device::Cuda(idx)),
                Err(_) => bail!("invalid cuda device index in {:?}", spec),
            },
            None => bail!("unknown device {:?}, expected auto, cpu, cuda or cuda:N", spec),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device() {
        assert_eq!(parse_device("cpu").unwrap(), Device::Cpu);
        assert_eq!(parse_device(" CUDA ").unwrap(), Device::Cuda(0));
        assert_eq!(parse_device("cuda:1").unwrap(), Device::Cuda(1));
        assert!(parse_device("cuda:x").is_err());
        assert!(parse_device("tpu").is_err());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ModelConfig = serde_json::from_str(r#"{"embed_size": 64, "backbone": "resnet18"}"#).unwrap();
        assert_eq!(config.embed_size, 64);
        assert_eq!(config.backbone, Backbone::ResNet18);
        assert_eq!(config.hidden_size, ModelConfig::default().hidden_size);
        assert_eq!(config.image_size, 224);
    }

    #[test]
    fn test_feature_dims() {
        assert_eq!(Backbone::ResNet18.feature_dim(), 512);
        assert_eq!(Backbone::ResNet50.feature_dim(), 2048);
    }
}
