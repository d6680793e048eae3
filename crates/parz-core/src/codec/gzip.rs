//! Gzip members with a raw deflate body.
//!
//! Layout of one member:
//!
//! ```text
//! 1f 8b 08 00 | 00 00 00 00 | XFL | 03 | deflate body | CRC-32 LE | ISIZE LE
//! ```
//!
//! The modification time is always zero so that identical input always
//! produces identical output.

use bytes::Bytes;
#[cfg(feature = "gzip")]
use flate2::{Compress, Compression, FlushCompress, Status};

use crate::ParzError;
use crate::codec::{Codec, CodecBackend, ExternalCommand};
use crate::types::{BackendKind, CodecKind, Result};

pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
pub const GZIP_HEADER_LEN: usize = 10;
pub const GZIP_TRAILER_LEN: usize = 8;

const CM_DEFLATE: u8 = 8;
const OS_UNIX: u8 = 3;

/// Builds the fixed member header for `level`.
pub fn header(level: u32) -> [u8; GZIP_HEADER_LEN] {
    let extra_flags = match level {
        9 => 2,
        1 => 4,
        _ => 0,
    };
    [
        GZIP_MAGIC[0],
        GZIP_MAGIC[1],
        CM_DEFLATE,
        0,
        0,
        0,
        0,
        0,
        extra_flags,
        OS_UNIX,
    ]
}

/// CRC-32 of the raw block followed by its length mod 2^32, both little-endian.
pub fn trailer(payload: &[u8]) -> [u8; GZIP_TRAILER_LEN] {
    let mut out = [0u8; GZIP_TRAILER_LEN];
    out[..4].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out[4..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    out
}

enum Engine {
    #[cfg(feature = "gzip")]
    Native(Box<Compress>),
    External(ExternalCommand),
}

/// Deflate codec producing one gzip member per block.
pub struct GzipCodec {
    level: u32,
    header: Bytes,
    engine: Engine,
}

impl GzipCodec {
    pub fn new(level: u32, backend: &CodecBackend) -> Result<Self> {
        let engine = match backend {
            CodecBackend::Native => native_engine(level)?,
            CodecBackend::External(command) => Engine::External(command.clone()),
        };
        Ok(Self {
            level,
            header: Bytes::copy_from_slice(&header(level)),
            engine,
        })
    }

    pub fn level(&self) -> u32 {
        self.level
    }
}

#[cfg(feature = "gzip")]
fn native_engine(level: u32) -> Result<Engine> {
    // Raw deflate: the gzip framing is written by this module, not by zlib.
    Ok(Engine::Native(Box::new(Compress::new(
        Compression::new(level),
        false,
    ))))
}

#[cfg(not(feature = "gzip"))]
fn native_engine(_level: u32) -> Result<Engine> {
    Err(super::unavailable(CodecKind::Gzip))
}

impl Codec for GzipCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Gzip
    }

    fn backend(&self) -> BackendKind {
        match self.engine {
            #[cfg(feature = "gzip")]
            Engine::Native(_) => BackendKind::Native,
            Engine::External(_) => BackendKind::External,
        }
    }

    fn header(&self) -> Bytes {
        self.header.clone()
    }

    fn trailer(&self, payload: &[u8], _body_len: usize) -> Vec<u8> {
        trailer(payload).to_vec()
    }

    fn compress_body(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        match &mut self.engine {
            #[cfg(feature = "gzip")]
            Engine::Native(compress) => deflate_raw(compress, payload),
            Engine::External(command) => {
                let member = command.run(payload)?;
                external_body(&member, payload)
            }
        }
    }
}

#[cfg(feature = "gzip")]
fn deflate_raw(compress: &mut Compress, payload: &[u8]) -> Result<Vec<u8>> {
    compress.reset();
    let start = compress.total_in();
    let mut body = Vec::with_capacity(payload.len() / 2 + 128);

    loop {
        let consumed = (compress.total_in() - start) as usize;
        let status = compress
            .compress_vec(&payload[consumed..], &mut body, FlushCompress::Finish)
            .map_err(|err| ParzError::CompressionError(format!("deflate failed: {err}")))?;
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => body.reserve(body.capacity().max(64 * 1024)),
        }
    }

    Ok(body)
}

/// Strips the framing `gzip -c -n` wrote around the deflate body.
///
/// The trailer is checked against our own so the member stays byte-compatible
/// with the native backend.
fn external_body(member: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    if member.len() < GZIP_HEADER_LEN + GZIP_TRAILER_LEN
        || member[..2] != GZIP_MAGIC
        || member[2] != CM_DEFLATE
    {
        return Err(ParzError::CompressionError(
            "gzip produced an unrecognised member".to_string(),
        ));
    }
    if member[3] != 0 {
        return Err(ParzError::CompressionError(
            "gzip member carries optional header fields".to_string(),
        ));
    }

    let trailer_start = member.len() - GZIP_TRAILER_LEN;
    let expected = trailer(payload);
    if member[trailer_start..] != expected {
        let actual = u32::from_le_bytes([
            member[trailer_start],
            member[trailer_start + 1],
            member[trailer_start + 2],
            member[trailer_start + 3],
        ]);
        return Err(ParzError::ChecksumMismatch {
            expected: crc32fast::hash(payload),
            actual,
        });
    }

    Ok(member[GZIP_HEADER_LEN..trailer_start].to_vec())
}

/// Decodes a concatenation of gzip members, one payload per member.
#[cfg(feature = "gzip")]
pub fn decode_members(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    use std::io::Read;

    let mut members = Vec::new();
    let mut remaining = data;
    while !remaining.is_empty() {
        let mut decoder = flate2::bufread::GzDecoder::new(remaining);
        let mut member = Vec::new();
        decoder.read_to_end(&mut member).map_err(|err| {
            ParzError::DecompressionError(format!("gzip member {}: {err}", members.len()))
        })?;
        remaining = decoder.into_inner();
        members.push(member);
    }
    Ok(members)
}

#[cfg(not(feature = "gzip"))]
pub fn decode_members(_data: &[u8]) -> Result<Vec<Vec<u8>>> {
    Err(super::unavailable(CodecKind::Gzip))
}
