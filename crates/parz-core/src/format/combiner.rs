use std::io::Write;

use crate::ParzError;
use crate::telemetry::tags;
use crate::types::{CompressedFrame, Result};

use super::ReorderBuffer;

/// Appends completed frames to the destination strictly in index order.
///
/// Frames may be inserted in any order; [`combine`](Self::combine) writes
/// every frame that continues the contiguous run from the last written index
/// and leaves the rest pending. Calling it when nothing is ready does nothing.
#[derive(Debug)]
pub struct Combiner<W: Write> {
    writer: W,
    reorder: ReorderBuffer<CompressedFrame>,
    frames_written: u64,
    bytes_written: u64,
}

impl<W: Write> Combiner<W> {
    /// Creates a combiner with an unbounded reorder buffer.
    pub fn new(writer: W) -> Self {
        Self::with_reorder_buffer(writer, ReorderBuffer::new())
    }

    /// Creates a combiner that rejects more than `max_pending` out-of-order frames.
    pub fn with_reorder_limit(writer: W, max_pending: usize) -> Self {
        Self::with_reorder_buffer(writer, ReorderBuffer::with_limit(max_pending))
    }

    fn with_reorder_buffer(writer: W, reorder: ReorderBuffer<CompressedFrame>) -> Self {
        Self {
            writer,
            reorder,
            frames_written: 0,
            bytes_written: 0,
        }
    }

    /// Parks a completed frame until its predecessors have been written.
    pub fn insert(&mut self, frame: CompressedFrame) -> Result<()> {
        self.reorder.insert(frame.index, frame)
    }

    /// Writes every frame that is now contiguous and returns how many were written.
    pub fn combine(&mut self) -> Result<usize> {
        let mut written = 0usize;
        while let Some(frame) = self.reorder.pop_ready() {
            frame.write_to(&mut self.writer)?;
            self.frames_written += 1;
            self.bytes_written += frame.len() as u64;
            written += 1;
            tracing::trace!(
                target: tags::TARGET_COMBINER,
                index = frame.index,
                bytes = frame.len(),
                "frame combined"
            );
        }
        Ok(written)
    }

    /// Inserts a frame, then combines whatever became contiguous.
    pub fn accept(&mut self, frame: CompressedFrame) -> Result<usize> {
        self.insert(frame)?;
        self.combine()
    }

    /// Index of the last frame written, `None` before the first.
    pub fn last_combined_index(&self) -> Option<u64> {
        self.reorder.last_combined_index()
    }

    /// Index of the frame the combiner is waiting for.
    pub fn next_expected(&self) -> u64 {
        self.reorder.next_expected()
    }

    pub fn pending_len(&self) -> usize {
        self.reorder.pending_len()
    }

    pub fn peak_pending(&self) -> usize {
        self.reorder.peak_pending()
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Flushes the destination and returns it.
    ///
    /// Fails if frames are still waiting for a predecessor that never arrived.
    pub fn finish(mut self) -> Result<W> {
        if self.reorder.pending_len() > 0 {
            return Err(ParzError::InvalidState(
                "cannot finish with frames still pending in the reorder buffer",
            ));
        }
        self.writer.flush()?;
        Ok(self.writer)
    }
}
