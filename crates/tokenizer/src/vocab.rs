use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::{Result, TokenizerError};
use crate::word::{Tokenize, WordTokenizer};

pub const PAD_TOKEN: &str = "<PAD>";
pub const SOS_TOKEN: &str = "<SOS>";
pub const EOS_TOKEN: &str = "<EOS>";
pub const UNK_TOKEN: &str = "<UNK>";

const RESERVED: [&str; 4] = [PAD_TOKEN, SOS_TOKEN, EOS_TOKEN, UNK_TOKEN];

/// Token/index mapping built from a caption corpus.
///
/// Indices 0..4 are always `<PAD>`, `<SOS>`, `<EOS>`, `<UNK>`. Corpus tokens
/// start at 4 and only tokens seen at least `freq_threshold` times get one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VocabularyFile", into = "VocabularyFile")]
pub struct Vocabulary {
    index_to_token: Vec<String>,
    token_to_index: HashMap<String, i64>,
    frequency: HashMap<String, u32>,
    freq_threshold: u32,
}

/// On-disk form. The reverse index is rebuilt on load so the two maps can
/// never disagree.
#[derive(Serialize, Deserialize)]
struct VocabularyFile {
    freq_threshold: u32,
    index_to_token: Vec<String>,
    frequency: HashMap<String, u32>,
}

impl From<Vocabulary> for VocabularyFile {
    fn from(vocab: Vocabulary) -> Self {
        Self {
            freq_threshold: vocab.freq_threshold,
            index_to_token: vocab.index_to_token,
            frequency: vocab.frequency,
        }
    }
}

impl TryFrom<VocabularyFile> for Vocabulary {
    type Error = TokenizerError;

    fn try_from(file: VocabularyFile) -> Result<Self> {
        if file.index_to_token.len() < RESERVED.len()
            || file.index_to_token[..RESERVED.len()] != RESERVED
        {
            return Err(TokenizerError::Malformed(
                "reserved tokens must occupy indices 0-3".to_string(),
            ));
        }

        let mut token_to_index = HashMap::with_capacity(file.index_to_token.len());
        for (idx, token) in file.index_to_token.iter().enumerate() {
            if token_to_index.insert(token.clone(), idx as i64).is_some() {
                return Err(TokenizerError::Malformed(format!("duplicate token {:?}", token)));
            }
        }

        for token in &file.index_to_token[RESERVED.len()..] {
            let count = file.frequency.get(token).copied().unwrap_or(0);
            if count < file.freq_threshold {
                return Err(TokenizerError::Malformed(format!(
                    "token {:?} seen {} times, below threshold {}",
                    token, count, file.freq_threshold
                )));
            }
        }

        Ok(Self {
            index_to_token: file.index_to_token,
            token_to_index,
            frequency: file.frequency,
            freq_threshold: file.freq_threshold,
        })
    }
}

impl Vocabulary {
    /// Vocabulary holding only the four reserved tokens.
    pub fn new(freq_threshold: u32) -> Self {
        let mut vocab = Self {
            index_to_token: Vec::new(),
            token_to_index: HashMap::new(),
            frequency: HashMap::new(),
            freq_threshold,
        };
        for token in RESERVED {
            vocab.push(token.to_string());
        }
        vocab
    }

    /// Builds the vocabulary over `corpus` with the default [`WordTokenizer`].
    pub fn build<S: AsRef<str>>(corpus: &[S], freq_threshold: u32) -> Self {
        Self::build_with(&WordTokenizer, corpus, freq_threshold)
    }

    /// Counts every token of the corpus, then admits tokens with
    /// `count >= freq_threshold` in the order they were first seen.
    pub fn build_with<S: AsRef<str>>(
        tokenizer: &dyn Tokenize,
        corpus: &[S],
        freq_threshold: u32,
    ) -> Self {
        let mut vocab = Self::new(freq_threshold);
        let mut first_seen: Vec<String> = Vec::new();

        for caption in corpus {
            for token in tokenizer.tokenize(caption.as_ref()) {
                let count = vocab.frequency.entry(token.clone()).or_insert(0);
                if *count == 0 {
                    first_seen.push(token);
                }
                *count += 1;
            }
        }

        for token in first_seen {
            if vocab.frequency[&token] >= freq_threshold && !vocab.token_to_index.contains_key(&token) {
                vocab.push(token);
            }
        }

        vocab
    }

    fn push(&mut self, token: String) {
        let idx = self.index_to_token.len() as i64;
        self.token_to_index.insert(token.clone(), idx);
        self.index_to_token.push(token);
    }

    /// Maps every token of `text` to its index, `<UNK>` for anything unknown.
    pub fn encode(&self, text: &str) -> Vec<i64> {
        self.encode_with(&WordTokenizer, text)
    }

    pub fn encode_with(&self, tokenizer: &dyn Tokenize, text: &str) -> Vec<i64> {
        let unk = self.unk_index();
        tokenizer
            .tokenize(text)
            .iter()
            .map(|token| self.token_to_index.get(token).copied().unwrap_or(unk))
            .collect()
    }

    /// `[<SOS>, tokens..., <EOS>]`, keeping at most `max_tokens` word tokens
    /// so the end marker always survives truncation.
    pub fn numericalize(&self, text: &str, max_tokens: Option<usize>) -> Vec<i64> {
        let mut ids = self.encode(text);
        if let Some(max) = max_tokens {
            ids.truncate(max);
        }

        let mut out = Vec::with_capacity(ids.len() + 2);
        out.push(self.sos_index());
        out.extend(ids);
        out.push(self.eos_index());
        out
    }

    /// Joins the tokens for `ids` with single spaces. Reserved tokens are
    /// dropped; ids outside the vocabulary read as `<UNK>`.
    pub fn decode(&self, ids: &[i64]) -> String {
        ids.iter()
            .filter(|&&id| !(0..RESERVED.len() as i64).contains(&id) || id == self.unk_index())
            .map(|&id| self.token(id).unwrap_or(UNK_TOKEN))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn token(&self, id: i64) -> Option<&str> {
        usize::try_from(id)
            .ok()
            .and_then(|idx| self.index_to_token.get(idx))
            .map(String::as_str)
    }

    pub fn index(&self, token: &str) -> Option<i64> {
        self.token_to_index.get(token).copied()
    }

    /// Occurrences of `token` in the corpus the vocabulary was built from,
    /// including tokens that fell below the threshold.
    pub fn frequency(&self, token: &str) -> u32 {
        self.frequency.get(token).copied().unwrap_or(0)
    }

    pub fn freq_threshold(&self) -> u32 {
        self.freq_threshold
    }

    pub fn size(&self) -> usize {
        self.token_to_index.len()
    }

    pub fn len(&self) -> usize {
        self.size()
    }

    /// Never true: the reserved tokens are always present.
    pub fn is_empty(&self) -> bool {
        self.token_to_index.is_empty()
    }

    pub fn pad_index(&self) -> i64 {
        0
    }

    pub fn sos_index(&self) -> i64 {
        1
    }

    pub fn eos_index(&self) -> i64 {
        2
    }

    pub fn unk_index(&self) -> i64 {
        3
    }

    /// SHA-256 over the ordered token list. Two vocabularies with the same
    /// signature assign the same index to every token.
    pub fn signature(&self) -> String {
        let mut hasher = Sha256::new();
        for token in &self.index_to_token {
            hasher.update(token.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Errors with [`TokenizerError::VocabMismatch`] unless `other` maps
    /// tokens exactly like `self`.
    pub fn ensure_same_mapping(&self, other: &Vocabulary) -> Result<()> {
        let expected = self.signature();
        let found = other.signature();
        if expected != found {
            return Err(TokenizerError::VocabMismatch { expected, found });
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }
}
