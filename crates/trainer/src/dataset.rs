use anyhow::{bail, Context, Result};
use caption_core::ImageTransform;
use log::{info, warn};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tch::Tensor;
use tokenizer::Vocabulary;

/// Parallel image id / caption columns of a manifest, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    pub image_ids: Vec<String>,
    pub captions: Vec<String>,
}

impl Manifest {
    pub fn len(&self) -> usize {
        self.image_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_ids.is_empty()
    }
}

/// Parses `image,caption` lines after a header line. Each line is split on
/// its first comma only, so captions may contain commas. The image id is
/// trimmed; the caption is kept as written, minus the line ending. Lines
/// without a comma, with an empty image id or that are not valid UTF-8 are
/// dropped with a warning.
pub fn parse_manifest<R: BufRead>(reader: R) -> Result<Manifest> {
    let mut manifest = Manifest::default();

    for (line_no, raw) in reader.split(b'\n').enumerate() {
        let raw = raw?;
        if line_no == 0 {
            continue;
        }
        let line = match String::from_utf8(raw) {
            Ok(line) => line,
            Err(e) => {
                warn!("Skipping manifest line {}: {}", line_no + 1, e);
                continue;
            }
        };
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }

        match line.split_once(',') {
            Some((image_id, caption)) if !image_id.trim().is_empty() => {
                manifest.image_ids.push(image_id.trim().to_string());
                manifest.captions.push(caption.to_string());
            }
            _ => warn!("Skipping malformed manifest line {}: {:?}", line_no + 1, line),
        }
    }

    Ok(manifest)
}

pub fn load_manifest<P: AsRef<Path>>(path: P) -> Result<Manifest> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open manifest {:?}", path))?;
    parse_manifest(BufReader::new(file))
}

/// One transformed image and its `[<SOS>, ..., <EOS>]` caption.
#[derive(Debug)]
pub struct Sample {
    pub image: Tensor,
    pub caption: Vec<i64>,
}

/// Image/caption pairs from a manifest. The vocabulary is built over every
/// caption when the dataset is created and never changes afterwards.
pub struct CaptionDataset {
    root_dir: PathBuf,
    manifest: Manifest,
    vocab: Arc<Vocabulary>,
    transform: ImageTransform,
    max_caption_tokens: Option<usize>,
}

impl CaptionDataset {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        root_dir: P,
        manifest_path: Q,
        freq_threshold: u32,
        max_caption_tokens: Option<usize>,
        transform: ImageTransform,
    ) -> Result<Self> {
        let manifest = load_manifest(manifest_path)?;
        Ok(Self::from_manifest(
            root_dir,
            manifest,
            freq_threshold,
            max_caption_tokens,
            transform,
        ))
    }

    pub fn from_manifest<P: AsRef<Path>>(
        root_dir: P,
        manifest: Manifest,
        freq_threshold: u32,
        max_caption_tokens: Option<usize>,
        transform: ImageTransform,
    ) -> Self {
        let vocab = Vocabulary::build(&manifest.captions, freq_threshold);
        info!(
            "Loaded {} samples, vocabulary size {} (freq_threshold {})",
            manifest.len(),
            vocab.size(),
            freq_threshold
        );

        Self {
            root_dir: root_dir.as_ref().to_path_buf(),
            manifest,
            vocab: Arc::new(vocab),
            transform,
            max_caption_tokens,
        }
    }

    pub fn len(&self) -> usize {
        self.manifest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manifest.is_empty()
    }

    pub fn vocab(&self) -> &Arc<Vocabulary> {
        &self.vocab
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn image_path(&self, index: usize) -> Option<PathBuf> {
        self.manifest
            .image_ids
            .get(index)
            .map(|id| self.root_dir.join(id))
    }

    /// Numericalized caption of sample `index`.
    pub fn caption(&self, index: usize) -> Option<Vec<i64>> {
        self.manifest
            .captions
            .get(index)
            .map(|c| self.vocab.numericalize(c, self.max_caption_tokens))
    }

    /// Loads and transforms the image of sample `index`. A missing or
    /// undecodable image is an error, never skipped.
    pub fn item(&self, index: usize) -> Result<Sample> {
        let (Some(path), Some(caption)) = (self.image_path(index), self.caption(index)) else {
            bail!("sample index {} out of range ({} samples)", index, self.len());
        };
        let image = self.transform.load(&path)?;
        Ok(Sample { image, caption })
    }
}
