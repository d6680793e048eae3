use std::path::PathBuf;

use thiserror::Error;

use crate::types::CodecKind;

#[derive(Debug, Error)]
pub enum ParzError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    #[error("no {codec} backend available: {reason}")]
    BackendUnavailable { codec: CodecKind, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("compression error: {0}")]
    CompressionError(String),
    #[error("decompression error: {0}")]
    DecompressionError(String),
    #[error("external compressor `{program}` failed ({status}): {stderr}")]
    ExternalProcess {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("worker {worker_id} failed on block {index}: {source}")]
    WorkerFailed {
        worker_id: usize,
        index: u64,
        #[source]
        source: Box<ParzError>,
    },
    #[error("invalid block index (expected {expected}, actual {actual})")]
    InvalidBlockId { expected: u64, actual: u64 },
    #[error("duplicate block index {0} in reorder buffer")]
    DuplicateBlock(u64),
    #[error("reorder buffer capacity exceeded ({limit} frames pending)")]
    ReorderOverflow { limit: usize },
    #[error("invalid pipeline state: {0}")]
    InvalidState(&'static str),
    #[error("checksum mismatch (expected {expected:#010x}, actual {actual:#010x})")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("run aborted")]
    Aborted,
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<ParzError>,
    },
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ParzError {
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Wraps a codec error with the worker and block it came from.
    pub fn worker_failed(worker_id: usize, index: u64, source: ParzError) -> Self {
        Self::WorkerFailed {
            worker_id,
            index,
            source: Box::new(source),
        }
    }
}
