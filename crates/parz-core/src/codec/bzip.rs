//! Bzip2 members.
//!
//! A bzip2 stream is already self-framed (magic, block headers, stream CRC and
//! end-of-stream marker), so each block becomes one complete stream and no
//! extra header or trailer is added.

use bytes::Bytes;

use crate::ParzError;
use crate::codec::{Codec, CodecBackend, ExternalCommand};
use crate::types::{BackendKind, CodecKind, Result};

pub const BZIP2_MAGIC: [u8; 3] = *b"BZh";

enum Engine {
    #[cfg(feature = "bzip2")]
    Native,
    External(ExternalCommand),
}

/// Bzip2 codec producing one complete bzip2 stream per block.
pub struct Bzip2Codec {
    level: u32,
    engine: Engine,
}

impl Bzip2Codec {
    pub fn new(level: u32, backend: &CodecBackend) -> Result<Self> {
        let engine = match backend {
            CodecBackend::Native => native_engine()?,
            CodecBackend::External(command) => Engine::External(command.clone()),
        };
        Ok(Self { level, engine })
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

#[cfg(feature = "bzip2")]
fn native_engine() -> Result<Engine> {
    Ok(Engine::Native)
}

#[cfg(not(feature = "bzip2"))]
fn native_engine() -> Result<Engine> {
    Err(super::unavailable(CodecKind::Bzip2))
}

impl Codec for Bzip2Codec {
    fn kind(&self) -> CodecKind {
        CodecKind::Bzip2
    }

    fn backend(&self) -> BackendKind {
        match self.engine {
            #[cfg(feature = "bzip2")]
            Engine::Native => BackendKind::Native,
            Engine::External(_) => BackendKind::External,
        }
    }

    fn header(&self) -> Bytes {
        Bytes::new()
    }

    fn trailer(&self, _payload: &[u8], _body_len: usize) -> Vec<u8> {
        Vec::new()
    }

    fn compress_body(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        let stream = match &self.engine {
            #[cfg(feature = "bzip2")]
            Engine::Native => bzip2_stream(self.level, payload)?,
            Engine::External(command) => command.run(payload)?,
        };

        if !stream.starts_with(&BZIP2_MAGIC) {
            return Err(ParzError::CompressionError(
                "bzip2 produced a stream without the BZh signature".to_string(),
            ));
        }
        Ok(stream)
    }
}

#[cfg(feature = "bzip2")]
fn bzip2_stream(level: u32, payload: &[u8]) -> Result<Vec<u8>> {
    use std::io::Write;

    let mut encoder = ::bzip2::write::BzEncoder::new(
        Vec::with_capacity(payload.len() / 2 + 64),
        ::bzip2::Compression::new(level),
    );
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Decodes a concatenation of bzip2 streams, one payload per stream.
#[cfg(feature = "bzip2")]
pub fn decode_members(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    use std::io::Read;

    let mut members = Vec::new();
    let mut remaining = data;
    while !remaining.is_empty() {
        let mut decoder = ::bzip2::bufread::BzDecoder::new(remaining);
        let mut member = Vec::new();
        decoder.read_to_end(&mut member).map_err(|err| {
            ParzError::DecompressionError(format!("bzip2 member {}: {err}", members.len()))
        })?;
        remaining = decoder.into_inner();
        members.push(member);
    }
    Ok(members)
}

#[cfg(not(feature = "bzip2"))]
pub fn decode_members(_data: &[u8]) -> Result<Vec<Vec<u8>>> {
    Err(super::unavailable(CodecKind::Bzip2))
}
