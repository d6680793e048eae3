use std::fmt;
use std::io::Write;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::ParzError;

pub type Result<T> = std::result::Result<T, ParzError>;

/// Default block size used when the caller does not configure one.
pub const DEFAULT_BLOCK_SIZE: usize = 10 * 1024 * 1024;

/// A contiguous, indexed slice of the source stream.
///
/// Blocks are the unit of parallel compression. Indices are assigned by the
/// block reader in read order starting at zero.
#[derive(Debug, Clone)]
pub struct Block {
    pub index: u64,
    payload: Bytes,
}

impl Block {
    /// Creates a new block
    ///
    /// # Arguments
    /// * `index` - Position of this block in the source stream
    /// * `payload` - The raw bytes
    pub fn new(index: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            index,
            payload: payload.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Returns the raw block bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// The compressed representation of one block.
///
/// `header ++ body ++ trailer` is one self-contained container member that can
/// be decompressed without any other frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompressedFrame {
    pub index: u64,
    pub header: Bytes,
    pub body: Vec<u8>,
    pub trailer: Vec<u8>,
}

impl CompressedFrame {
    pub fn new(index: u64, header: Bytes, body: Vec<u8>, trailer: Vec<u8>) -> Self {
        Self {
            index,
            header,
            body,
            trailer,
        }
    }

    /// Total member size in bytes.
    pub fn len(&self) -> usize {
        self.header.len() + self.body.len() + self.trailer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes the member bytes to `writer`.
    pub fn write_to<W: Write + ?Sized>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.header)?;
        writer.write_all(&self.body)?;
        writer.write_all(&self.trailer)
    }

    /// Concatenates the member into one contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(&self.header);
        out.extend_from_slice(&self.body);
        out.extend_from_slice(&self.trailer);
        out
    }
}

/// Container format produced for each block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Gzip,
    Bzip2,
    Lzip,
}

impl CodecKind {
    /// Conventional file extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
            Self::Lzip => ".lz",
        }
    }

    /// Name of the equivalent stand-alone compression program.
    pub fn program(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Lzip => "lzip",
        }
    }

    /// Accepted compression level range.
    pub fn level_range(self) -> std::ops::RangeInclusive<u32> {
        match self {
            Self::Gzip | Self::Lzip => 0..=9,
            Self::Bzip2 => 1..=9,
        }
    }

    /// Rejects a level outside [`CodecKind::level_range`].
    pub fn check_level(self, level: u32) -> Result<()> {
        let range = self.level_range();
        if range.contains(&level) {
            return Ok(());
        }
        Err(ParzError::InvalidConfig(format!(
            "{self} level must be within {}..={}, got {level}",
            range.start(),
            range.end(),
        )))
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// Where a codec's compression routine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process library routine.
    Native,
    /// Stand-alone program fed over stdin/stdout.
    External,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::External => f.write_str("external"),
        }
    }
}

/// Converts a duration to whole microseconds, clamped to `u64::MAX`.
#[inline]
pub fn duration_to_us(duration: Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}
