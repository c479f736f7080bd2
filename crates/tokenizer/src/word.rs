use regex::Regex;
use std::sync::OnceLock;

/// Splits a caption into word-level tokens.
///
/// Implementations must be deterministic: the vocabulary is built and later
/// queried with the same tokenizer, and any drift between the two silently
/// turns known words into `<UNK>`.
pub trait Tokenize: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Letter/digit runs (apostrophes allowed inside a word) or a single
/// punctuation character.
const WORD_PATTERN: &str = r"[\p{L}\p{N}]+(?:'[\p{L}\p{N}]+)*|[^\s\p{L}\p{N}]";

fn word_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(WORD_PATTERN).unwrap())
}

/// Lowercasing word tokenizer. Whitespace is dropped, punctuation is kept as
/// standalone tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct WordTokenizer;

impl Tokenize for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        word_regex()
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect()
    }
}
