//! Error types for Blogochain

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("Invalid block linkage at block {index}")]
    InvalidBlockLinkage { index: u64 },
    #[error("Hash mismatch at block {index}")]
    HashMismatch { index: u64 },
    #[error("Invalid proof of work at block {index} (difficulty {difficulty})")]
    InvalidProofOfWork { index: u64, difficulty: u32 },
    #[error("Invalid block index: expected {expected}, found {found}")]
    InvalidBlockIndex { expected: u64, found: u64 },
    #[error("Invalid difficulty: {0} (must be between 0 and 64)")]
    InvalidDifficulty(i64),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl From<tokio::task::JoinError> for ChainError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChainError::TaskFailed(err.to_string())
    }
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ChainError {
    fn from(err: serde_json::Error) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
