use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::ParzError;
use crate::codec::CodecFactory;
use crate::core::WorkerPool;
use crate::format::Combiner;
use crate::io::{BlockReader, effective_block_size};
use crate::telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
use crate::telemetry::{elapsed_us, tags};
use crate::types::{CodecKind, Result};

mod controller;
pub mod types;

use controller::{ControlOptions, ControlOutcome};
pub use types::{AbortHandle, PipelineConfig, PipelineState, RunStats, SourceRetention};

const OUTPUT_BUFFER_SIZE: usize = 1024 * 1024;

/// Conventional destination path: the source path with the codec's extension appended.
pub fn destination_for(source: &Path, codec: CodecKind) -> PathBuf {
    let mut name = OsString::from(source.as_os_str());
    name.push(codec.extension());
    PathBuf::from(name)
}

/// Parallel block compressor.
///
/// Splits the input into blocks, compresses them on a fixed pool of worker
/// threads and writes one container member per block to the destination in
/// the original block order.
pub struct CompressionPipeline {
    config: PipelineConfig,
    codec_factory: Option<Arc<dyn CodecFactory>>,
    telemetry: Arc<dyn WorkerTelemetry>,
    abort_tx: Sender<()>,
    abort_rx: Receiver<()>,
}

impl CompressionPipeline {
    /// Creates a pipeline after validating `config`.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let (abort_tx, abort_rx) = bounded(1);
        Ok(Self {
            config,
            codec_factory: None,
            telemetry: Arc::new(DefaultWorkerTelemetry),
            abort_tx,
            abort_rx,
        })
    }

    /// Uses `factory` for every worker instead of resolving the configured codec.
    pub fn with_codec_factory(mut self, factory: Arc<dyn CodecFactory>) -> Self {
        self.codec_factory = Some(factory);
        self
    }

    /// Replaces the worker telemetry backend.
    pub fn with_telemetry(mut self, telemetry: Arc<dyn WorkerTelemetry>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Handle that cancels the current (or next) run from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.abort_tx.clone())
    }

    /// Compresses a stream of unknown length; the configured block size is used as is.
    pub fn compress_stream<R: Read, W: Write>(
        &self,
        reader: R,
        writer: W,
    ) -> Result<(W, RunStats)> {
        self.compress_reader(reader, writer, None)
    }

    /// Compresses `reader` into `writer`.
    ///
    /// `source_len`, when known, lets the block size shrink so that small
    /// inputs still give every worker a block.
    pub fn compress_reader<R: Read, W: Write>(
        &self,
        reader: R,
        writer: W,
        source_len: Option<u64>,
    ) -> Result<(W, RunStats)> {
        self.compress_reader_with_progress(reader, writer, source_len, |_state| {})
    }

    /// Compresses `reader` into `writer`, reporting the pipeline state after every completed block.
    pub fn compress_reader_with_progress<R, W, F>(
        &self,
        reader: R,
        writer: W,
        source_len: Option<u64>,
        on_progress: F,
    ) -> Result<(W, RunStats)>
    where
        R: Read,
        W: Write,
        F: FnMut(&PipelineState),
    {
        let factory = self.codec_factory()?;
        self.run(factory.as_ref(), reader, writer, source_len, on_progress)
    }

    /// Compresses the file at `source` into a new file at `destination`.
    ///
    /// Fails before any worker starts if `destination` already exists. On any
    /// failure after the destination was created, the partial file is
    /// removed. On success the source is removed unless the configuration
    /// keeps it.
    pub fn compress_file(&self, source: &Path, destination: &Path) -> Result<RunStats> {
        if destination.exists() {
            return Err(ParzError::DestinationExists(destination.to_path_buf()));
        }

        let factory = self.codec_factory()?;

        let input = File::open(source).map_err(|err| {
            ParzError::from(err).with_context(format!("opening {}", source.display()))
        })?;
        let source_len = input.metadata()?.len();

        let output = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(destination)
            .map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => {
                    ParzError::DestinationExists(destination.to_path_buf())
                }
                _ => ParzError::from(err)
                    .with_context(format!("creating {}", destination.display())),
            })?;

        let writer = BufWriter::with_capacity(OUTPUT_BUFFER_SIZE, output);
        let result = self
            .run(factory.as_ref(), input, writer, Some(source_len), |_state| {})
            .and_then(|(writer, stats)| {
                let file = writer.into_inner().map_err(|err| err.into_error())?;
                file.sync_all()?;
                Ok(stats)
            });

        let stats = match result {
            Ok(stats) => stats,
            Err(error) => {
                if let Err(cleanup) = fs::remove_file(destination) {
                    tracing::warn!(
                        target: tags::TARGET_PIPELINE,
                        destination = %destination.display(),
                        error = %cleanup,
                        "failed to remove partial destination"
                    );
                }
                return Err(error);
            }
        };

        if self.config.source_retention == SourceRetention::Discard {
            fs::remove_file(source).map_err(|err| {
                ParzError::from(err).with_context(format!("removing {}", source.display()))
            })?;
        }

        Ok(stats)
    }

    fn codec_factory(&self) -> Result<Arc<dyn CodecFactory>> {
        if let Some(factory) = &self.codec_factory {
            return Ok(Arc::clone(factory));
        }
        let resolved = self.config.codec_spec().resolve()?;
        Ok(Arc::new(resolved))
    }

    fn run<R, W, F>(
        &self,
        factory: &dyn CodecFactory,
        reader: R,
        writer: W,
        source_len: Option<u64>,
        on_progress: F,
    ) -> Result<(W, RunStats)>
    where
        R: Read,
        W: Write,
        F: FnMut(&PipelineState),
    {
        let started_at = Instant::now();
        let workers = self.config.workers;
        let block_size = effective_block_size(self.config.block_size, source_len, workers);

        tracing::info!(
            target: tags::TARGET_PIPELINE,
            codec = %factory.kind(),
            backend = %factory.backend(),
            level = self.config.level,
            workers,
            block_size,
            source_len = ?source_len,
            "compression started"
        );

        let pool = WorkerPool::spawn(workers, factory, Arc::clone(&self.telemetry))?;
        let combiner = match self.config.max_pending_frames {
            // Frames already in flight when dispatch pauses may still land.
            Some(limit) => Combiner::with_reorder_limit(writer, limit + workers),
            None => Combiner::new(writer),
        };
        let options = ControlOptions {
            liveness_interval: self.config.liveness_interval,
            max_pending_frames: self.config.max_pending_frames,
            verbose: self.config.verbose,
        };

        let ControlOutcome {
            writer,
            state,
            peak_pending,
            runtime,
        } = controller::run(
            pool,
            BlockReader::new(reader, block_size),
            combiner,
            &self.abort_rx,
            &options,
            on_progress,
        )?;

        let stats = RunStats {
            codec: factory.kind(),
            level: self.config.level,
            backend: factory.backend(),
            workers,
            block_size,
            blocks: state.next_read_index,
            input_bytes: state.bytes_read,
            output_bytes: state.bytes_written,
            elapsed_us: elapsed_us(started_at),
            peak_pending,
            worker_runtime: runtime.workers,
        };

        tracing::info!(
            target: tags::TARGET_PIPELINE,
            blocks = stats.blocks,
            input_bytes = stats.input_bytes,
            output_bytes = stats.output_bytes,
            elapsed_us = stats.elapsed_us,
            "compression finished"
        );
        Ok((writer, stats))
    }
}
