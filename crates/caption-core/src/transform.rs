use anyhow::{Context, Result};
use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tch::Tensor;

use crate::config::ModelConfig;

/// Per-channel mean/std applied after scaling pixels to [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl Normalization {
    /// Statistics the torchvision backbones were trained with.
    pub const IMAGENET: Normalization = Normalization {
        mean: [0.485, 0.456, 0.406],
        std: [0.229, 0.224, 0.225],
    };
}

/// Resize + tensor conversion, with optional normalization. The encoder does
/// not resize, so every image must pass through this first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTransform {
    pub image_size: u32,
    pub normalize: Option<Normalization>,
}

impl ImageTransform {
    pub fn new(image_size: u32, normalize: Option<Normalization>) -> Self {
        Self {
            image_size,
            normalize,
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        let normalize = config.normalize.then_some(Normalization::IMAGENET);
        Self::new(config.image_size, normalize)
    }

    /// CHW float pixels of length `3 * image_size^2`.
    pub fn pixels(&self, image: &RgbImage) -> Vec<f32> {
        let size = self.image_size;
        let resized;
        let image = if image.dimensions() != (size, size) {
            resized = image::imageops::resize(image, size, size, FilterType::Triangle);
            &resized
        } else {
            image
        };

        let plane = (size * size) as usize;
        let mut data = vec![0f32; 3 * plane];
        for (x, y, pixel) in image.enumerate_pixels() {
            let offset = (y * size + x) as usize;
            for c in 0..3 {
                let mut value = pixel[c] as f32 / 255.0;
                if let Some(norm) = &self.normalize {
                    value = (value - norm.mean[c]) / norm.std[c];
                }
                data[c * plane + offset] = value;
            }
        }
        data
    }

    /// `[3, image_size, image_size]` float tensor on the CPU.
    pub fn apply(&self, image: &RgbImage) -> Tensor {
        let size = self.image_size as i64;
        Tensor::from_slice(&self.pixels(image)).view([3, size, size])
    }

    /// Decodes the file at `path`, converts it to RGB and applies the transform.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<Tensor> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to load image {:?}", path))?
            .to_rgb8();
        Ok(self.apply(&image))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    #[test]
    fn test_resizes_to_square() {
        let transform = ImageTransform::new(32, None);
        let image = RgbImage::from_pixel(50, 20, Rgb([255, 0, 0]));
        let tensor = transform.apply(&image);
        assert_eq!(tensor.size(), vec![3, 32, 32]);
    }

    #[test]
    fn test_scales_to_unit_range_in_chw_order() {
        let transform = ImageTransform::new(4, None);
        let image = RgbImage::from_pixel(4, 4, Rgb([255, 0, 51]));
        let pixels = transform.pixels(&image);
        assert_eq!(pixels.len(), 3 * 16);
        assert!(pixels[..16].iter().all(|&v| (v - 1.0).abs() < 1e-6));
        assert!(pixels[16..32].iter().all(|&v| v.abs() < 1e-6));
        assert!(pixels[32..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_normalization() {
        let norm = Normalization {
            mean: [0.5, 0.5, 0.5],
            std: [0.5, 0.5, 0.5],
        };
        let transform = ImageTransform::new(2, Some(norm));
        let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 255]));
        let pixels = transform.pixels(&image);
        assert!((pixels[0] - 1.0).abs() < 1e-6);
        assert!((pixels[4] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_converts_grayscale_to_rgb() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gray.png");
        GrayImage::from_pixel(10, 10, Luma([128])).save(&path).unwrap();

        let tensor = ImageTransform::new(8, None).load(&path).unwrap();
        assert_eq!(tensor.size(), vec![3, 8, 8]);
    }

    #[test]
    fn test_missing_image_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.jpg");
        let err = ImageTransform::new(8, None).load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("missing.jpg"));
    }
}
