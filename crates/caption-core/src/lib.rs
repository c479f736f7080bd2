pub mod checkpoint;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod model;
pub mod safetensors_util;
pub mod transform;

pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint, BACKBONE_FILE};
pub use config::{parse_device, Backbone, ModelConfig};
pub use decoder::Decoder;
pub use encoder::Encoder;
pub use error::CheckpointError;
pub use model::CaptionModel;
pub use transform::{ImageTransform, Normalization};
