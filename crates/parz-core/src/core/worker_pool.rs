use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use serde::Serialize;

use crate::ParzError;
use crate::codec::{Codec, CodecFactory};
use crate::telemetry::tags;
use crate::telemetry::worker::WorkerTelemetry;
use crate::types::{Block, CompressedFrame, Result, duration_to_us};

/// Lifecycle of one worker slot as seen by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for a block.
    Idle,
    /// Compressing the block with this index.
    Busy { index: u64 },
    /// Still running, but will receive no further blocks.
    Retired,
    /// Acknowledged the stop signal and was joined.
    Stopped,
}

/// Result of one block, sent by a worker on the shared completion channel.
#[derive(Debug)]
pub struct Completion {
    pub worker_id: usize,
    pub index: u64,
    pub result: Result<CompressedFrame>,
}

enum WorkerMessage {
    Compress(Block),
    Stop,
}

struct WorkerSlot {
    state: WorkerState,
    inbox: Option<Sender<WorkerMessage>>,
    handle: Option<JoinHandle<()>>,
}

struct WorkerCounters {
    blocks_completed: Vec<AtomicUsize>,
    busy_us: Vec<AtomicU64>,
}

impl WorkerCounters {
    fn new(num_workers: usize) -> Self {
        Self {
            blocks_completed: (0..num_workers).map(|_| AtomicUsize::new(0)).collect(),
            busy_us: (0..num_workers).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

/// Per-worker runtime metrics captured by the worker pool.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerRuntimeSnapshot {
    pub worker_id: usize,
    pub blocks_completed: usize,
    pub busy_us: u64,
    pub utilization: f64,
}

/// Runtime metrics snapshot for the worker pool.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PoolRuntimeSnapshot {
    pub elapsed_us: u64,
    pub workers: Vec<WorkerRuntimeSnapshot>,
}

/// Fixed-size set of compression threads, each owning one codec instance.
///
/// Every worker has a private dispatch channel with room for exactly one
/// block, and all workers report on one shared completion channel. The
/// idle/busy bookkeeping lives here and is only mutated by the thread that
/// owns the pool; workers never touch it.
pub struct WorkerPool {
    slots: Vec<WorkerSlot>,
    completions: Receiver<Completion>,
    counters: Arc<WorkerCounters>,
    started_at: Instant,
}

impl WorkerPool {
    /// Creates one codec per worker, then starts the worker threads.
    ///
    /// All codecs are built before any thread is spawned, so a missing
    /// backend is reported without a single worker having started.
    pub fn spawn(
        num_workers: usize,
        factory: &dyn CodecFactory,
        telemetry: Arc<dyn WorkerTelemetry>,
    ) -> Result<Self> {
        if num_workers == 0 {
            return Err(ParzError::InvalidConfig(
                "worker pool needs at least one worker".to_string(),
            ));
        }

        let codecs = (0..num_workers)
            .map(|_| factory.create())
            .collect::<Result<Vec<_>>>()?;

        let (completion_tx, completion_rx) = unbounded();
        let counters = Arc::new(WorkerCounters::new(num_workers));
        let mut pool = Self {
            slots: Vec::with_capacity(num_workers),
            completions: completion_rx,
            counters,
            started_at: Instant::now(),
        };

        for (worker_id, codec) in codecs.into_iter().enumerate() {
            let (inbox_tx, inbox_rx) = bounded(1);
            let worker_completions = completion_tx.clone();
            let worker_counters = Arc::clone(&pool.counters);
            let worker_telemetry = Arc::clone(&telemetry);

            // On failure `pool` is dropped here, which joins the workers already running.
            let handle = thread::Builder::new()
                .name(format!("parz-worker-{worker_id}"))
                .spawn(move || {
                    run_worker_loop(
                        worker_id,
                        codec,
                        inbox_rx,
                        worker_completions,
                        worker_counters,
                        worker_telemetry,
                    );
                })
                .map_err(|err| {
                    ParzError::from(err).with_context(format!("spawning worker {worker_id}"))
                })?;

            pool.slots.push(WorkerSlot {
                state: WorkerState::Idle,
                inbox: Some(inbox_tx),
                handle: Some(handle),
            });
        }

        tracing::debug!(
            target: tags::TARGET_WORKER,
            workers = num_workers,
            codec = %factory.kind(),
            "worker pool started"
        );
        Ok(pool)
    }

    /// Number of workers in this pool.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn state(&self, worker_id: usize) -> Option<WorkerState> {
        self.slots.get(worker_id).map(|slot| slot.state)
    }

    /// Ids of workers currently waiting for a block, lowest first.
    pub fn idle_workers(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == WorkerState::Idle)
            .map(|(worker_id, _)| worker_id)
            .collect()
    }

    /// Number of workers currently compressing a block.
    pub fn in_flight(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.state, WorkerState::Busy { .. }))
            .count()
    }

    /// Shared completion channel.
    pub fn completions(&self) -> &Receiver<Completion> {
        &self.completions
    }

    /// Hands `block` to an idle worker and marks it busy.
    pub fn dispatch(&mut self, worker_id: usize, block: Block) -> Result<()> {
        let slot = self
            .slots
            .get_mut(worker_id)
            .ok_or(ParzError::InvalidState("dispatch to unknown worker"))?;
        if slot.state != WorkerState::Idle {
            return Err(ParzError::InvalidState("dispatch to a worker that is not idle"));
        }
        let inbox = slot
            .inbox
            .as_ref()
            .ok_or(ParzError::InvalidState("dispatch to a stopped worker"))?;

        let index = block.index;
        inbox
            .send(WorkerMessage::Compress(block))
            .map_err(|_| {
                ParzError::CompressionError(format!("worker {worker_id} is no longer running"))
            })?;
        slot.state = WorkerState::Busy { index };
        Ok(())
    }

    /// Records that `completion` arrived, returning its worker to idle.
    pub fn complete(&mut self, completion: &Completion) -> Result<()> {
        let slot = self
            .slots
            .get_mut(completion.worker_id)
            .ok_or(ParzError::InvalidState("completion from unknown worker"))?;
        match slot.state {
            WorkerState::Busy { index } if index == completion.index => {
                slot.state = WorkerState::Idle;
                Ok(())
            }
            _ => Err(ParzError::InvalidState(
                "completion does not match the block dispatched to the worker",
            )),
        }
    }

    /// Marks an idle worker as having no more work coming.
    pub fn retire(&mut self, worker_id: usize) -> Result<()> {
        let slot = self
            .slots
            .get_mut(worker_id)
            .ok_or(ParzError::InvalidState("retire of unknown worker"))?;
        if slot.state != WorkerState::Idle {
            return Err(ParzError::InvalidState("retire of a worker that is not idle"));
        }
        slot.state = WorkerState::Retired;
        Ok(())
    }

    /// Returns a worker whose thread exited without being asked to stop.
    pub fn find_dead_worker(&self) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.state != WorkerState::Stopped
                && slot.handle.as_ref().is_some_and(JoinHandle::is_finished)
        })
    }

    /// Waits for every busy worker to report back, discarding the results.
    ///
    /// Used on the abort path: blocks are never cancelled mid-compression, so
    /// workers have to finish before they can be stopped.
    pub fn drain_in_flight(&mut self, liveness_interval: Duration) {
        while self.in_flight() > 0 {
            match self.completions.recv_timeout(liveness_interval) {
                Ok(completion) => {
                    let _ = self.complete(&completion);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(worker_id) = self.find_dead_worker() {
                        // A dead worker will never report; stop waiting for it.
                        if let Some(slot) = self.slots.get_mut(worker_id) {
                            slot.state = WorkerState::Retired;
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Stops and joins every worker once no block is in flight.
    pub fn shutdown(mut self) -> Result<PoolRuntimeSnapshot> {
        if self.in_flight() > 0 {
            return Err(ParzError::InvalidState(
                "worker pool shut down with blocks in flight",
            ));
        }
        self.stop_and_join()?;
        Ok(self.runtime_snapshot())
    }

    /// Abort path: lets in-flight blocks finish, then stops every worker.
    pub fn abort(mut self, liveness_interval: Duration) -> PoolRuntimeSnapshot {
        self.drain_in_flight(liveness_interval);
        if let Err(error) = self.stop_and_join() {
            tracing::warn!(
                target: tags::TARGET_WORKER,
                %error,
                "worker shutdown after abort failed"
            );
        }
        self.runtime_snapshot()
    }

    /// Returns runtime metrics for each worker.
    pub fn runtime_snapshot(&self) -> PoolRuntimeSnapshot {
        let elapsed_us = duration_to_us(self.started_at.elapsed());
        let workers = (0..self.slots.len())
            .map(|worker_id| {
                let busy_us = self.counters.busy_us[worker_id]
                    .load(Ordering::Acquire)
                    .min(elapsed_us);
                let utilization = if elapsed_us == 0 {
                    0.0
                } else {
                    busy_us as f64 / elapsed_us as f64
                };
                WorkerRuntimeSnapshot {
                    worker_id,
                    blocks_completed: self.counters.blocks_completed[worker_id]
                        .load(Ordering::Acquire),
                    busy_us,
                    utilization,
                }
            })
            .collect();

        PoolRuntimeSnapshot {
            elapsed_us,
            workers,
        }
    }

    fn stop_and_join(&mut self) -> Result<()> {
        for slot in &mut self.slots {
            if let Some(inbox) = slot.inbox.take() {
                // A worker that already exited has dropped its receiver.
                let _ = inbox.send(WorkerMessage::Stop);
            }
        }

        let mut first_error = None;
        for (worker_id, slot) in self.slots.iter_mut().enumerate() {
            if let Some(handle) = slot.handle.take() {
                if let Err(payload) = handle.join() {
                    if first_error.is_none() {
                        first_error = Some(ParzError::CompressionError(format!(
                            "worker {worker_id} panicked: {}",
                            panic_message(payload.as_ref())
                        )));
                    }
                }
            }
            slot.state = WorkerState::Stopped;
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.slots.iter().any(|slot| slot.handle.is_some()) {
            let _ = self.stop_and_join();
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn run_worker_loop(
    worker_id: usize,
    mut codec: Box<dyn Codec>,
    inbox: Receiver<WorkerMessage>,
    completions: Sender<Completion>,
    counters: Arc<WorkerCounters>,
    telemetry: Arc<dyn WorkerTelemetry>,
) {
    telemetry.on_worker_started(worker_id);

    while let Ok(message) = inbox.recv() {
        let block = match message {
            WorkerMessage::Compress(block) => block,
            WorkerMessage::Stop => break,
        };

        let index = block.index;
        telemetry.on_block_started(worker_id, index, block.len());
        let started_at = Instant::now();

        let result = match catch_unwind(AssertUnwindSafe(|| codec.compress(&block))) {
            Ok(result) => result,
            Err(payload) => Err(ParzError::CompressionError(format!(
                "codec panicked on block {index}: {}",
                panic_message(payload.as_ref())
            ))),
        };
        drop(block);

        let elapsed = started_at.elapsed();
        counters.busy_us[worker_id].fetch_add(duration_to_us(elapsed), Ordering::AcqRel);
        match &result {
            Ok(frame) => {
                counters.blocks_completed[worker_id].fetch_add(1, Ordering::AcqRel);
                telemetry.on_block_finished(worker_id, index, frame.len(), elapsed);
            }
            Err(_) => telemetry.on_block_failed(worker_id, index, elapsed),
        }

        let result = result.map_err(|error| ParzError::worker_failed(worker_id, index, error));
        if completions
            .send(Completion {
                worker_id,
                index,
                result,
            })
            .is_err()
        {
            break;
        }
    }

    telemetry.on_worker_stopped(worker_id);
}
