use anyhow::{bail, Result};
use tch::{Device, Tensor};

use crate::dataset::Sample;

/// Images stacked to `[batch, 3, H, W]`, captions right-padded to the
/// longest caption of the batch.
#[derive(Debug)]
pub struct Batch {
    pub images: Tensor,
    /// [batch, max_len], int64
    pub captions: Tensor,
    /// Unpadded caption lengths, in sample order.
    pub lengths: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lengths.is_empty()
    }

    pub fn to_device(self, device: Device) -> Self {
        Self {
            images: self.images.to_device(device),
            captions: self.captions.to_device(device),
            lengths: self.lengths,
        }
    }
}

/// Row-major `[captions.len(), max_len]` buffer padded with `pad_index`,
/// plus `max_len`.
pub fn pad_captions(captions: &[Vec<i64>], pad_index: i64) -> (Vec<i64>, usize) {
    let max_len = captions.iter().map(Vec::len).max().unwrap_or(0);
    let mut flat = Vec::with_capacity(captions.len() * max_len);
    for caption in captions {
        flat.extend_from_slice(caption);
        flat.extend(std::iter::repeat(pad_index).take(max_len - caption.len()));
    }
    (flat, max_len)
}

pub fn collate(samples: Vec<Sample>, pad_index: i64) -> Result<Batch> {
    if samples.is_empty() {
        bail!("cannot collate an empty batch");
    }

    let (images, captions): (Vec<Tensor>, Vec<Vec<i64>>) =
        samples.into_iter().map(|s| (s.image, s.caption)).unzip();
    let lengths: Vec<usize> = captions.iter().map(Vec::len).collect();

    let (flat, max_len) = pad_captions(&captions, pad_index);
    let captions = Tensor::from_slice(&flat).view([lengths.len() as i64, max_len as i64]);

    Ok(Batch {
        images: Tensor::stack(&images, 0),
        captions,
        lengths,
    })
}
