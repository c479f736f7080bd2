use thiserror::Error;

#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Vocabulary mismatch: expected signature {expected}, found {found}")]
    VocabMismatch { expected: String, found: String },

    #[error("Malformed vocabulary: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, TokenizerError>;
