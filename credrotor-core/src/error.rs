//! Top-level error types for credrotor.

use thiserror::Error;

use crate::config::ConfigError;
use crate::directory::DirectoryError;
use crate::engine::EngineError;
use crate::store::StoreError;
use crate::token::TokenError;

/// Top-level error type encompassing all credrotor errors.
#[derive(Debug, Error)]
pub enum CredrotorError {
    /// Error from secret storage operations.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error from token operations.
    #[error("token error: {0}")]
    Token(#[from] TokenError),

    /// Error from directory operations.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Error from the rotation engine.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
