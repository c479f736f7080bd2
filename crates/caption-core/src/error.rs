use thiserror::Error;

/// Reasons a checkpoint is refused. Carried inside `anyhow::Error`; callers
/// that need the cause use `downcast_ref::<CheckpointError>()`.
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("unsupported checkpoint format version {found} (supported: {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("vocabulary signature mismatch: checkpoint has {expected}, found {found}")]
    VocabularyMismatch { expected: String, found: String },

    #[error("model expects {model} output classes but the vocabulary has {vocabulary} entries")]
    VocabSizeMismatch { model: i64, vocabulary: usize },

    #[error("tensors missing from weights file: {}", .0.join(", "))]
    MissingTensors(Vec<String>),

    #[error("shape mismatch for {name}: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },
}
