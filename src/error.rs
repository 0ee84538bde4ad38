// src/error.rs

use std::path::PathBuf;

/// Everything that can abort a convert, diff or trim run.
#[derive(Debug, thiserror::Error)]
pub enum CoverError {
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },

    #[error("malformed coverage profile {}:{line}: {message}", path.display())]
    ProfileFormat {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("coverage shapes do not match: {0}")]
    ShapeMismatch(String),

    #[error("`{command}` failed ({status}): {output}")]
    Subprocess {
        command: String,
        status: String,
        output: String,
    },

    #[error("hash-ids range is not in current branch commit. range-ids: {requested:?}, full-ids: {observed:?}")]
    RangeNotFound {
        requested: [String; 2],
        observed: Vec<String>,
    },

    #[error("can't find {path}: {reason}")]
    FileNotFound { path: String, reason: String },

    #[error("invalid diff info: {0}")]
    DiffFormat(String),

    #[error("git: {0}")]
    Git(#[from] git2::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = CoverError> = std::result::Result<T, E>;
