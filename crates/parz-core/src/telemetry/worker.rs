use std::time::Duration;

use crate::telemetry::tags;
use crate::types::duration_to_us;

/// Telemetry contract for worker runtimes.
///
/// The worker pool calls these hooks around every block so that callers can
/// attach their own metrics backend without touching the pool itself.
pub trait WorkerTelemetry: Send + Sync {
    fn on_worker_started(&self, worker_id: usize);
    fn on_block_started(&self, worker_id: usize, index: u64, raw_bytes: usize);
    fn on_block_finished(
        &self,
        worker_id: usize,
        index: u64,
        frame_bytes: usize,
        elapsed: Duration,
    );
    fn on_block_failed(&self, worker_id: usize, index: u64, elapsed: Duration);
    fn on_worker_stopped(&self, worker_id: usize);
}

/// Default telemetry implementation that reports through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultWorkerTelemetry;

impl WorkerTelemetry for DefaultWorkerTelemetry {
    fn on_worker_started(&self, worker_id: usize) {
        tracing::trace!(target: tags::TARGET_WORKER, worker_id, "worker started");
    }

    fn on_block_started(&self, worker_id: usize, index: u64, raw_bytes: usize) {
        tracing::trace!(
            target: tags::TARGET_WORKER,
            worker_id,
            index,
            raw_bytes,
            "block compression started"
        );
    }

    fn on_block_finished(
        &self,
        worker_id: usize,
        index: u64,
        frame_bytes: usize,
        elapsed: Duration,
    ) {
        tracing::debug!(
            target: tags::TARGET_WORKER,
            worker_id,
            index,
            frame_bytes,
            elapsed_us = duration_to_us(elapsed),
            "block compression finished"
        );
    }

    fn on_block_failed(&self, worker_id: usize, index: u64, elapsed: Duration) {
        tracing::warn!(
            target: tags::TARGET_WORKER,
            worker_id,
            index,
            elapsed_us = duration_to_us(elapsed),
            "block compression failed"
        );
    }

    fn on_worker_stopped(&self, worker_id: usize) {
        tracing::trace!(target: tags::TARGET_WORKER, worker_id, "worker stopped");
    }
}
