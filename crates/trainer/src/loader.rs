use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::collate::{collate, Batch};
use crate::dataset::{CaptionDataset, Sample};

/// Groups dataset indices into batches and loads them.
///
/// Images of one batch are decoded on a small rayon pool; everything else
/// runs on the caller's thread.
pub struct DataLoader<'a> {
    dataset: &'a CaptionDataset,
    batch_size: usize,
    shuffle: bool,
    rng: StdRng,
    pool: rayon::ThreadPool,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a CaptionDataset,
        batch_size: usize,
        shuffle: bool,
        seed: u64,
        num_workers: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_workers.max(1))
            .build()?;

        Ok(Self {
            dataset,
            batch_size: batch_size.max(1),
            shuffle,
            rng: StdRng::seed_from_u64(seed),
            pool,
        })
    }

    pub fn num_batches(&self) -> usize {
        (self.dataset.len() + self.batch_size - 1) / self.batch_size
    }

    /// Index plan for one pass over the dataset. The last batch may be short.
    pub fn epoch(&mut self) -> Vec<Vec<usize>> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            indices.shuffle(&mut self.rng);
        }
        indices.chunks(self.batch_size).map(<[usize]>::to_vec).collect()
    }

    pub fn load_batch(&self, indices: &[usize]) -> Result<Batch> {
        let dataset = self.dataset;
        let samples: Vec<Sample> = self
            .pool
            .install(|| indices.par_iter().map(|&i| dataset.item(i)).collect::<Result<_>>())?;
        collate(samples, dataset.vocab().pad_index())
    }
}
