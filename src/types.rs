//! Error types for vibe-data

use thiserror::Error;

use crate::simulated::StoreMode;

#[derive(Error, Debug)]
pub enum VibeError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cannot enter {to} mode while {from} mode is active; exit first")]
    ModeTransition { from: StoreMode, to: StoreMode },

    #[error("Remote update failed: {0}")]
    Remote(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, VibeError>;
