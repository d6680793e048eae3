pub mod codec;
pub mod core;
pub mod error;
pub mod format;
pub mod io;
pub mod pipeline;
pub mod telemetry;
pub mod types;

pub use codec::{
    BackendPreference, Capability, Codec, CodecBackend, CodecFactory, CodecSpec, ResolvedCodec,
    decode_members, decompress_all,
};
pub use crate::core::{
    Completion, PoolRuntimeSnapshot, WorkerPool, WorkerRuntimeSnapshot, WorkerState,
};
pub use error::ParzError;
pub use format::{Combiner, ReorderBuffer};
pub use io::{BlockReader, effective_block_size};
pub use pipeline::{
    AbortHandle, CompressionPipeline, PipelineConfig, PipelineState, RunStats, SourceRetention,
    destination_for,
};
pub use telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
pub use types::{BackendKind, Block, CodecKind, CompressedFrame, DEFAULT_BLOCK_SIZE, Result};
