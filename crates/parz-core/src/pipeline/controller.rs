use std::io::{Read, Write};
use std::time::Duration;

use crossbeam_channel::{Receiver, select};

use crate::ParzError;
use crate::core::{Completion, PoolRuntimeSnapshot, WorkerPool};
use crate::format::Combiner;
use crate::io::BlockReader;
use crate::telemetry::{progress, tags};
use crate::types::Result;

use super::types::PipelineState;

pub(crate) struct ControlOptions {
    pub liveness_interval: Duration,
    /// Soft limit on frames parked in the reorder buffer before dispatch pauses.
    pub max_pending_frames: Option<usize>,
    pub verbose: bool,
}

pub(crate) struct ControlOutcome<W> {
    pub writer: W,
    pub state: PipelineState,
    pub peak_pending: usize,
    pub runtime: PoolRuntimeSnapshot,
}

/// Runs read → dispatch → collect → combine until every block is written.
///
/// Owns the pool for the whole run. On success every worker has been stopped
/// and joined and the destination flushed; on failure in-flight blocks are
/// drained, every worker is stopped, and the first error is returned.
pub(crate) fn run<R, W, F>(
    mut pool: WorkerPool,
    mut reader: BlockReader<R>,
    mut combiner: Combiner<W>,
    abort: &Receiver<()>,
    options: &ControlOptions,
    mut on_progress: F,
) -> Result<ControlOutcome<W>>
where
    R: Read,
    W: Write,
    F: FnMut(&PipelineState),
{
    let mut controller = Controller {
        pool: &mut pool,
        reader: &mut reader,
        combiner: &mut combiner,
        options,
    };

    if let Err(error) = controller.drive(abort, &mut on_progress) {
        tracing::warn!(target: tags::TARGET_PIPELINE, %error, "run aborted");
        pool.abort(options.liveness_interval);
        return Err(error);
    }

    let state = snapshot(&pool, &reader, &combiner);
    let peak_pending = combiner.peak_pending();
    let runtime = pool.shutdown()?;
    let writer = combiner.finish()?;

    Ok(ControlOutcome {
        writer,
        state,
        peak_pending,
        runtime,
    })
}

struct Controller<'a, R: Read, W: Write> {
    pool: &'a mut WorkerPool,
    reader: &'a mut BlockReader<R>,
    combiner: &'a mut Combiner<W>,
    options: &'a ControlOptions,
}

impl<R: Read, W: Write> Controller<'_, R, W> {
    fn drive<F>(&mut self, abort: &Receiver<()>, on_progress: &mut F) -> Result<()>
    where
        F: FnMut(&PipelineState),
    {
        let completions = self.pool.completions().clone();
        self.dispatch_idle()?;

        loop {
            let state = self.state();
            if state.is_complete() && state.in_flight == 0 {
                return Ok(());
            }
            if state.in_flight == 0 {
                return Err(ParzError::InvalidState(
                    "no block in flight but the run is not complete",
                ));
            }

            select! {
                recv(completions) -> message => {
                    let completion = message.map_err(|_| {
                        ParzError::InvalidState("completion channel closed with blocks in flight")
                    })?;
                    self.handle_completion(completion)?;
                    self.dispatch_idle()?;
                    on_progress(&self.state());
                }
                recv(abort) -> _ => return Err(ParzError::Aborted),
                default(self.options.liveness_interval) => {
                    if let Some(worker_id) = self.pool.find_dead_worker() {
                        return Err(ParzError::CompressionError(format!(
                            "worker {worker_id} exited unexpectedly"
                        )));
                    }
                }
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion) -> Result<()> {
        self.pool.complete(&completion)?;
        let Completion {
            worker_id,
            index,
            result,
        } = completion;
        let frame = result?;

        progress!(
            self.options.verbose,
            worker_id,
            index,
            frame_bytes = frame.len(),
            "block compressed"
        );
        self.combiner.insert(frame)?;
        let written = self.combiner.combine()?;
        if written > 0 {
            progress!(
                self.options.verbose,
                combined = written,
                last_combined_index = ?self.combiner.last_combined_index(),
                pending = self.combiner.pending_len(),
                "frames combined"
            );
        }
        Ok(())
    }

    /// Hands one freshly read block to every idle worker.
    ///
    /// Workers idle at end of input are retired. While the reorder buffer is
    /// at its soft limit no new block is read, so idle workers wait for the
    /// straggler to complete.
    fn dispatch_idle(&mut self) -> Result<()> {
        for worker_id in self.pool.idle_workers() {
            if self.reorder_full() {
                break;
            }
            match self.reader.next_block()? {
                Some(block) => {
                    progress!(
                        self.options.verbose,
                        worker_id,
                        index = block.index,
                        bytes = block.len(),
                        "block dispatched"
                    );
                    self.pool.dispatch(worker_id, block)?;
                }
                None => self.pool.retire(worker_id)?,
            }
        }
        Ok(())
    }

    fn reorder_full(&self) -> bool {
        self.options
            .max_pending_frames
            .is_some_and(|limit| self.combiner.pending_len() >= limit)
    }

    fn state(&self) -> PipelineState {
        snapshot(self.pool, self.reader, self.combiner)
    }
}

fn snapshot<R: Read, W: Write>(
    pool: &WorkerPool,
    reader: &BlockReader<R>,
    combiner: &Combiner<W>,
) -> PipelineState {
    PipelineState {
        next_read_index: reader.next_index(),
        last_combined_index: combiner.last_combined_index(),
        pending: combiner.pending_len(),
        in_flight: pool.in_flight(),
        eof_reached: reader.eof_reached(),
        bytes_read: reader.bytes_read(),
        bytes_written: combiner.bytes_written(),
    }
}
