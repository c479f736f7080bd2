use tch::{nn, nn::ModuleT, Tensor};

use crate::config::ModelConfig;

/// Frozen backbone followed by a trainable projection to `embed_size`.
pub struct Encoder {
    backbone: nn::FuncT<'static>,
    projection: nn::Linear,
}

impl Encoder {
    /// `vs` receives the trainable projection, `backbone_vs` the backbone
    /// variables. The caller owns freezing and loading `backbone_vs`.
    pub fn new(vs: &nn::Path, backbone_vs: &nn::Path, config: &ModelConfig) -> Self {
        let backbone = config.backbone.build(backbone_vs);
        let projection = nn::linear(
            vs / "projection",
            config.backbone.feature_dim(),
            config.embed_size,
            Default::default(),
        );

        Self {
            backbone,
            projection,
        }
    }

    /// images: [batch, 3, H, W], already resized.
    /// Returns: [batch, embed_size]
    pub fn forward(&self, images: &Tensor) -> Tensor {
        // Batch-norm layers stay in eval mode so running statistics never move.
        let features = tch::no_grad(|| self.backbone.forward_t(images, false));
        features.apply(&self.projection)
    }
}
