use crate::drainer::DrainOrigin;
use std::io;
use std::num::ParseIntError;
use thiserror::Error;

/// Result type for drain pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur while building or running the pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Invalid pipeline configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A stage thread could not be spawned
    #[error("Failed to spawn stage {stage}: {source}")]
    Spawn {
        stage: String,
        #[source]
        source: io::Error,
    },

    /// The output sink failed to write a drained batch.
    ///
    /// The batch is carried along so the values are not lost with the error.
    #[error("Failed to emit {origin} drain of {} values: {source}", .batch.len())]
    Emit {
        origin: DrainOrigin,
        batch: Vec<i64>,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Values that were drained but never reached the output sink
    pub fn undelivered(&self) -> Option<&[i64]> {
        match self {
            PipelineError::Emit { batch, .. } => Some(batch),
            _ => None,
        }
    }
}

/// Errors produced by a token source on a single read attempt
#[derive(Error, Debug)]
pub enum SourceError {
    /// The token was not an integer; the next read moves on to the next token
    #[error("malformed token {token:?}: {source}")]
    Malformed {
        token: String,
        #[source]
        source: ParseIntError,
    },

    /// The underlying reader failed
    #[error("read failed: {0}")]
    Io(#[from] io::Error),

    /// No more tokens will ever be produced
    #[error("input exhausted")]
    Exhausted,
}

impl SourceError {
    /// Whether a later read may still succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, SourceError::Exhausted)
    }
}
