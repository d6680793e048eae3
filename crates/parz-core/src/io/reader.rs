use std::io::Read;

use crate::telemetry::tags;
use crate::types::{Block, DEFAULT_BLOCK_SIZE, Result};

/// Block size actually used for a run.
///
/// When the source length is known and smaller than one block per worker, the
/// block size shrinks to `source_len / workers` (at least one byte) so that
/// every worker receives a block. Unknown-length sources keep the configured
/// size.
pub fn effective_block_size(
    configured: Option<usize>,
    source_len: Option<u64>,
    workers: usize,
) -> usize {
    let block_size = configured.unwrap_or(DEFAULT_BLOCK_SIZE).max(1);
    let workers = workers.max(1);

    match source_len {
        Some(len) if u128::from(len) < block_size as u128 * workers as u128 => {
            // `len / workers < block_size` here, so the cast cannot truncate.
            ((len / workers as u64) as usize).max(1)
        }
        _ => block_size,
    }
}

/// Splits a byte source into sequentially indexed blocks.
///
/// Each call to [`next_block`](Self::next_block) reads exactly `block_size`
/// bytes, except for the final block which may be shorter. Once the source is
/// exhausted the reader returns `None` and stays exhausted.
#[derive(Debug)]
pub struct BlockReader<R: Read> {
    reader: R,
    block_size: usize,
    next_index: u64,
    bytes_read: u64,
    short_read: bool,
    eof_reached: bool,
}

impl<R: Read> BlockReader<R> {
    pub fn new(reader: R, block_size: usize) -> Self {
        Self {
            reader,
            block_size: block_size.max(1),
            next_index: 0,
            bytes_read: 0,
            short_read: false,
            eof_reached: false,
        }
    }

    /// Reads the next block, or returns `None` once the source is exhausted.
    pub fn next_block(&mut self) -> Result<Option<Block>> {
        if self.eof_reached {
            return Ok(None);
        }
        // A short block already hit end of input; reading again could block on a live stream.
        if self.short_read {
            self.mark_eof();
            return Ok(None);
        }

        let mut payload = Vec::with_capacity(self.block_size);
        let read = (&mut self.reader)
            .take(self.block_size as u64)
            .read_to_end(&mut payload)?;
        if read == 0 {
            self.mark_eof();
            return Ok(None);
        }
        if read < self.block_size {
            self.short_read = true;
        }

        let index = self.next_index;
        self.next_index += 1;
        self.bytes_read += read as u64;
        tracing::trace!(target: tags::TARGET_READER, index, bytes = read, "block read");
        Ok(Some(Block::new(index, payload)))
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Index the next block will receive; equals the number of blocks read so far.
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn eof_reached(&self) -> bool {
        self.eof_reached
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    fn mark_eof(&mut self) {
        self.eof_reached = true;
        tracing::debug!(
            target: tags::TARGET_READER,
            blocks = self.next_index,
            bytes = self.bytes_read,
            "end of input"
        );
    }
}
