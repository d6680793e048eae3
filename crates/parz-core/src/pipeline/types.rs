use std::time::Duration;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::ParzError;
use crate::codec::{BackendPreference, CodecSpec};
use crate::core::WorkerRuntimeSnapshot;
use crate::types::{BackendKind, CodecKind, Result};

/// What happens to the source file after a successful file-to-file run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceRetention {
    /// Remove the source once the destination is complete.
    #[default]
    Discard,
    /// Leave the source in place.
    Keep,
}

/// Construction config for the compression pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Container format produced for every block.
    pub codec: CodecKind,
    /// Compression level handed to the codec.
    pub level: u32,
    /// Number of parallel workers.
    pub workers: usize,
    /// Block size in bytes; `None` uses [`DEFAULT_BLOCK_SIZE`](crate::DEFAULT_BLOCK_SIZE).
    pub block_size: Option<usize>,
    /// Where compression runs.
    pub backend: BackendPreference,
    /// Source file handling for [`compress_file`](super::CompressionPipeline::compress_file).
    pub source_retention: SourceRetention,
    /// How long the controller waits on completions before checking worker liveness.
    pub liveness_interval: Duration,
    /// Soft limit on completed frames waiting for a predecessor; `None` is unbounded.
    pub max_pending_frames: Option<usize>,
    /// Reports per-block progress at INFO instead of DEBUG.
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            codec: CodecKind::Gzip,
            level: 6,
            workers: 4,
            block_size: None,
            backend: BackendPreference::Auto,
            source_retention: SourceRetention::Discard,
            liveness_interval: Duration::from_millis(250),
            max_pending_frames: None,
            verbose: false,
        }
    }
}

impl PipelineConfig {
    /// Creates a configuration for `codec` with `workers` threads and defaults elsewhere.
    pub fn new(codec: CodecKind, workers: usize) -> Self {
        Self {
            codec,
            workers,
            ..Self::default()
        }
    }

    /// Codec request derived from this configuration.
    pub fn codec_spec(&self) -> CodecSpec {
        CodecSpec::new(self.codec, self.level).with_preference(self.backend)
    }

    /// Rejects configurations no run could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ParzError::InvalidConfig(
                "worker count must be at least 1".to_string(),
            ));
        }
        if self.block_size == Some(0) {
            return Err(ParzError::InvalidConfig(
                "block size must be at least 1 byte".to_string(),
            ));
        }
        self.codec.check_level(self.level)?;
        if self.liveness_interval.is_zero() {
            return Err(ParzError::InvalidConfig(
                "liveness interval must be non-zero".to_string(),
            ));
        }
        if self.max_pending_frames == Some(0) {
            return Err(ParzError::InvalidConfig(
                "reorder limit must be at least 1 frame".to_string(),
            ));
        }
        Ok(())
    }
}

/// Progress of one run as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PipelineState {
    /// Index the next block read will receive.
    pub next_read_index: u64,
    /// Last frame written to the destination; `None` before the first.
    pub last_combined_index: Option<u64>,
    /// Completed frames waiting for a predecessor.
    pub pending: usize,
    /// Blocks currently being compressed.
    pub in_flight: usize,
    pub eof_reached: bool,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl PipelineState {
    /// True once the source is exhausted and every block read has been combined.
    pub fn is_complete(&self) -> bool {
        let combined = self.last_combined_index.map_or(0, |index| index + 1);
        self.eof_reached && combined == self.next_read_index
    }
}

/// Summary of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub codec: CodecKind,
    pub level: u32,
    pub backend: BackendKind,
    pub workers: usize,
    pub block_size: usize,
    pub blocks: u64,
    pub input_bytes: u64,
    pub output_bytes: u64,
    pub elapsed_us: u64,
    /// Highest number of frames parked in the reorder buffer at once.
    pub peak_pending: usize,
    pub worker_runtime: Vec<WorkerRuntimeSnapshot>,
}

impl RunStats {
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us)
    }

    /// Output size relative to input size; 1.0 for empty input.
    pub fn compression_ratio(&self) -> f64 {
        if self.input_bytes == 0 {
            1.0
        } else {
            self.output_bytes as f64 / self.input_bytes as f64
        }
    }
}

/// Cancels a run from another thread.
///
/// An abort requested before a run starts cancels that run as soon as it
/// begins. Blocks already being compressed are allowed to finish.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    sender: Sender<()>,
}

impl AbortHandle {
    pub(crate) fn new(sender: Sender<()>) -> Self {
        Self { sender }
    }

    pub fn abort(&self) {
        // At most one request is queued; further ones are redundant.
        let _ = self.sender.try_send(());
    }
}
