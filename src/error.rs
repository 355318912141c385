use std::path::PathBuf;

use thiserror::Error;

/// Message returned to clients while the model store is not ready.
pub const NOT_READY_MESSAGE: &str = "Server is still initializing. Please try again later.";

/// Failures while loading artifacts into the model store.
///
/// These never reach clients directly; they leave the readiness gate closed and
/// the health endpoint keeps reporting `initializing`.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("model store was already initialized")]
    AlreadyInitialized,

    #[error("missing model artifact: {}", .0.display())]
    MissingArtifact(PathBuf),

    #[error("weight index lists no shards: {}", .0.display())]
    InvalidIndex(PathBuf),

    #[error("HuggingFace Hub error: {0}")]
    Hub(#[from] hf_hub::api::sync::ApiError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid model config: {0}")]
    Config(#[from] serde_json::Error),

    #[error("tokenizer loading failed: {0}")]
    Tokenizer(String),

    #[error("tokenizer has no padding token and the model declares no end-of-sequence token")]
    NoPadToken,

    #[error("model loading failed: {0}")]
    Model(#[from] candle_core::Error),
}

/// Outcome of a rejected `generate` call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    #[error("{}", NOT_READY_MESSAGE)]
    NotReady,

    #[error("{0}")]
    Inference(String),
}

/// Prompt rejected at the transport boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("prompt must contain at least 1 character")]
    Empty,

    #[error("prompt must contain at most {max} characters, got {len}")]
    TooLong { len: usize, max: usize },
}
