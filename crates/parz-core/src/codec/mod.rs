//! Block codecs.
//!
//! A codec turns one raw [`Block`] into one self-contained
//! [`CompressedFrame`]. Each worker owns its own codec instance for the whole
//! run, so implementations may keep reusable state (encoder tables, scratch
//! buffers) as long as nothing leaks from one block into the next block's
//! output.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ParzError;
use crate::telemetry::tags;
use crate::types::{BackendKind, Block, CodecKind, CompressedFrame, Result};

pub mod bzip;
pub mod external;
pub mod gzip;
pub mod lzip;

pub use bzip::Bzip2Codec;
pub use external::ExternalCommand;
pub use gzip::GzipCodec;
pub use lzip::LzipCodec;

/// Turns raw blocks into standalone container members.
pub trait Codec: Send {
    fn kind(&self) -> CodecKind;

    fn backend(&self) -> BackendKind;

    /// Format preamble emitted ahead of every body; identical for every block of a run.
    fn header(&self) -> Bytes;

    /// Format epilogue computed from the raw payload and the compressed body length.
    fn trailer(&self, payload: &[u8], body_len: usize) -> Vec<u8>;

    /// Compresses `payload` into the member body.
    fn compress_body(&mut self, payload: &[u8]) -> Result<Vec<u8>>;

    /// Compresses one block into a complete frame.
    fn compress(&mut self, block: &Block) -> Result<CompressedFrame> {
        let body = self.compress_body(block.payload())?;
        let trailer = self.trailer(block.payload(), body.len());
        Ok(CompressedFrame::new(block.index, self.header(), body, trailer))
    }
}

/// Builds one codec instance per worker.
pub trait CodecFactory: Send + Sync {
    fn kind(&self) -> CodecKind;

    fn backend(&self) -> BackendKind;

    fn create(&self) -> Result<Box<dyn Codec>>;
}

/// Caller preference for where compression runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Native when compiled in, otherwise the external program.
    #[default]
    Auto,
    Native,
    External,
}

/// A concrete backend selected for a codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecBackend {
    Native,
    External(ExternalCommand),
}

impl CodecBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Native => BackendKind::Native,
            Self::External(_) => BackendKind::External,
        }
    }
}

/// Outcome of the one-time backend capability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Available(CodecBackend),
    Unavailable { reason: String },
}

/// Whether an in-process routine for `kind` was compiled into this build.
pub fn native_available(kind: CodecKind) -> bool {
    match kind {
        CodecKind::Gzip => cfg!(feature = "gzip"),
        CodecKind::Bzip2 => cfg!(feature = "bzip2"),
        CodecKind::Lzip => cfg!(feature = "lzip"),
    }
}

/// External program invocation equivalent to the native codec at `level`.
pub fn external_command(kind: CodecKind, level: u32) -> ExternalCommand {
    let level_flag = format!("-{level}");
    match kind {
        CodecKind::Gzip => ExternalCommand::new("gzip", ["-c", "-n", level_flag.as_str()]),
        CodecKind::Bzip2 => ExternalCommand::new("bzip2", ["-c", level_flag.as_str()]),
        CodecKind::Lzip => ExternalCommand::new("lzip", ["-c", level_flag.as_str()]),
    }
}

/// Requested codec: kind, level and backend preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSpec {
    pub kind: CodecKind,
    pub level: u32,
    pub preference: BackendPreference,
}

impl CodecSpec {
    pub fn new(kind: CodecKind, level: u32) -> Self {
        Self {
            kind,
            level,
            preference: BackendPreference::Auto,
        }
    }

    pub fn with_preference(mut self, preference: BackendPreference) -> Self {
        self.preference = preference;
        self
    }

    /// Determines which backend, if any, can serve this spec.
    pub fn probe(&self) -> Capability {
        let native = || {
            if native_available(self.kind) {
                Capability::Available(CodecBackend::Native)
            } else {
                Capability::Unavailable {
                    reason: format!("native {} support was not compiled in", self.kind),
                }
            }
        };
        let external = || {
            let command = external_command(self.kind, self.level);
            match command.probe() {
                Ok(()) => Capability::Available(CodecBackend::External(command)),
                Err(reason) => Capability::Unavailable { reason },
            }
        };

        match self.preference {
            BackendPreference::Native => native(),
            BackendPreference::External => external(),
            BackendPreference::Auto => match native() {
                Capability::Available(backend) => Capability::Available(backend),
                Capability::Unavailable { reason: native_reason } => match external() {
                    Capability::Available(backend) => Capability::Available(backend),
                    Capability::Unavailable { reason } => Capability::Unavailable {
                        reason: format!("{native_reason}; {reason}"),
                    },
                },
            },
        }
    }

    /// Validates the level and resolves a backend, failing fast when none exists.
    pub fn resolve(self) -> Result<ResolvedCodec> {
        self.kind.check_level(self.level)?;

        match self.probe() {
            Capability::Available(backend) => {
                tracing::debug!(
                    target: tags::TARGET_CODEC,
                    codec = %self.kind,
                    level = self.level,
                    backend = %backend.kind(),
                    "codec backend selected"
                );
                Ok(ResolvedCodec {
                    kind: self.kind,
                    level: self.level,
                    backend,
                })
            }
            Capability::Unavailable { reason } => Err(ParzError::BackendUnavailable {
                codec: self.kind,
                reason,
            }),
        }
    }
}

/// A codec spec whose backend has been confirmed available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCodec {
    kind: CodecKind,
    level: u32,
    backend: CodecBackend,
}

impl ResolvedCodec {
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn codec_backend(&self) -> &CodecBackend {
        &self.backend
    }
}

impl CodecFactory for ResolvedCodec {
    fn kind(&self) -> CodecKind {
        self.kind
    }

    fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    fn create(&self) -> Result<Box<dyn Codec>> {
        let codec: Box<dyn Codec> = match self.kind {
            CodecKind::Gzip => Box::new(GzipCodec::new(self.level, &self.backend)?),
            CodecKind::Bzip2 => Box::new(Bzip2Codec::new(self.level, &self.backend)?),
            CodecKind::Lzip => Box::new(LzipCodec::new(self.level, &self.backend)?),
        };
        Ok(codec)
    }
}

/// Decodes every member of a multi-member stream, one payload per member.
pub fn decode_members(kind: CodecKind, data: &[u8]) -> Result<Vec<Vec<u8>>> {
    match kind {
        CodecKind::Gzip => gzip::decode_members(data),
        CodecKind::Bzip2 => bzip::decode_members(data),
        CodecKind::Lzip => lzip::decode_members(data),
    }
}

/// Decodes every member and concatenates the payloads in order.
pub fn decompress_all(kind: CodecKind, data: &[u8]) -> Result<Vec<u8>> {
    let members = decode_members(kind, data)?;
    let total = members.iter().map(Vec::len).sum();
    let mut out = Vec::with_capacity(total);
    for member in members {
        out.extend_from_slice(&member);
    }
    Ok(out)
}

#[cfg(not(all(feature = "gzip", feature = "bzip2", feature = "lzip")))]
pub(crate) fn unavailable(kind: CodecKind) -> ParzError {
    ParzError::BackendUnavailable {
        codec: kind,
        reason: format!("native {kind} support was not compiled in"),
    }
}
