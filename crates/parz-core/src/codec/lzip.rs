//! Lzip members.
//!
//! ```text
//! "LZIP" | version (1) | coded dictionary size | LZMA stream + end marker
//!   | CRC-32 LE (u32) | data size LE (u64) | member size LE (u64)
//! ```
//!
//! The member size covers header, body and trailer. The LZMA body always uses
//! the fixed lzip literal/position parameters (lc=3, lp=0, pb=2).

use bytes::Bytes;

use crate::ParzError;
use crate::codec::{Codec, CodecBackend, ExternalCommand};
use crate::types::{BackendKind, Block, CodecKind, CompressedFrame, Result};

pub const LZIP_MAGIC: [u8; 4] = *b"LZIP";
pub const LZIP_VERSION: u8 = 1;
pub const LZIP_HEADER_LEN: usize = 6;
pub const LZIP_TRAILER_LEN: usize = 20;

const MIN_DICTIONARY_SIZE: u32 = 1 << 12;
const MAX_DICTIONARY_SIZE: u32 = 1 << 29;

/// Dictionary size for each level, always a power of two.
pub fn dictionary_size(level: u32) -> u32 {
    match level {
        0 => 1 << 18,
        1 => 1 << 20,
        2 => 1 << 21,
        3 | 4 => 1 << 22,
        5 | 6 => 1 << 23,
        7 => 1 << 24,
        8 => 1 << 25,
        _ => 1 << 26,
    }
}

/// Encodes a power-of-two dictionary size into the lzip header byte.
pub fn encode_dictionary_size(size: u32) -> Option<u8> {
    if !size.is_power_of_two() || !(MIN_DICTIONARY_SIZE..=MAX_DICTIONARY_SIZE).contains(&size) {
        return None;
    }
    Some(size.trailing_zeros() as u8)
}

/// Decodes the lzip header byte: base size `2^(bits 0-4)` minus `base/16 * (bits 5-7)`.
pub fn decode_dictionary_size(coded: u8) -> Option<u32> {
    let exponent = u32::from(coded & 0x1f);
    if !(12..=29).contains(&exponent) {
        return None;
    }
    let base = 1u32 << exponent;
    let size = base - (base / 16) * u32::from(coded >> 5);
    (size >= MIN_DICTIONARY_SIZE).then_some(size)
}

pub fn header(level: u32) -> [u8; LZIP_HEADER_LEN] {
    // dictionary_size only yields in-range powers of two.
    let coded = encode_dictionary_size(dictionary_size(level)).unwrap_or(0x17);
    [
        LZIP_MAGIC[0],
        LZIP_MAGIC[1],
        LZIP_MAGIC[2],
        LZIP_MAGIC[3],
        LZIP_VERSION,
        coded,
    ]
}

pub fn trailer(payload: &[u8], body_len: usize) -> [u8; LZIP_TRAILER_LEN] {
    let member_size = (LZIP_HEADER_LEN + body_len + LZIP_TRAILER_LEN) as u64;
    let mut out = [0u8; LZIP_TRAILER_LEN];
    out[..4].copy_from_slice(&crc32fast::hash(payload).to_le_bytes());
    out[4..12].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    out[12..].copy_from_slice(&member_size.to_le_bytes());
    out
}

enum Engine {
    #[cfg(feature = "lzip")]
    Native,
    External(ExternalCommand),
}

/// LZMA codec producing one lzip member per block.
pub struct LzipCodec {
    level: u32,
    header: Bytes,
    engine: Engine,
}

impl LzipCodec {
    pub fn new(level: u32, backend: &CodecBackend) -> Result<Self> {
        let engine = match backend {
            CodecBackend::Native => native_engine()?,
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

#[cfg(feature = "lzip")]
fn native_engine() -> Result<Engine> {
    Ok(Engine::Native)
}

#[cfg(not(feature = "lzip"))]
fn native_engine() -> Result<Engine> {
    Err(super::unavailable(CodecKind::Lzip))
}

impl Codec for LzipCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Lzip
    }

    fn backend(&self) -> BackendKind {
        match self.engine {
            #[cfg(feature = "lzip")]
            Engine::Native => BackendKind::Native,
            Engine::External(_) => BackendKind::External,
        }
    }

    fn header(&self) -> Bytes {
        self.header.clone()
    }

    fn trailer(&self, payload: &[u8], body_len: usize) -> Vec<u8> {
        trailer(payload, body_len).to_vec()
    }

    fn compress_body(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        match &self.engine {
            #[cfg(feature = "lzip")]
            Engine::Native => lzma_body(self.level, payload),
            Engine::External(command) => {
                let member = command.run(payload)?;
                let (_, body, _) = split_member(&member, payload)?;
                Ok(body.to_vec())
            }
        }
    }

    fn compress(&mut self, block: &Block) -> Result<CompressedFrame> {
        match &self.engine {
            // The lzip program picks its own dictionary size, so its header is kept.
            Engine::External(command) => {
                let member = command.run(block.payload())?;
                let (header, body, trailer) = split_member(&member, block.payload())?;
                Ok(CompressedFrame::new(
                    block.index,
                    Bytes::copy_from_slice(header),
                    body.to_vec(),
                    trailer.to_vec(),
                ))
            }
            #[cfg(feature = "lzip")]
            Engine::Native => {
                let body = lzma_body(self.level, block.payload())?;
                let trailer = trailer(block.payload(), body.len());
                Ok(CompressedFrame::new(
                    block.index,
                    self.header.clone(),
                    body,
                    trailer.to_vec(),
                ))
            }
        }
    }
}

/// Splits a single lzip member written by the external program.
fn split_member<'a>(member: &'a [u8], payload: &[u8]) -> Result<(&'a [u8], &'a [u8], &'a [u8])> {
    if member.len() < LZIP_HEADER_LEN + LZIP_TRAILER_LEN
        || member[..4] != LZIP_MAGIC
        || member[4] != LZIP_VERSION
    {
        return Err(ParzError::CompressionError(
            "lzip produced an unrecognised member".to_string(),
        ));
    }

    let trailer_start = member.len() - LZIP_TRAILER_LEN;
    let trailer = &member[trailer_start..];
    let crc = read_u32_le(&trailer[..4]);
    let expected_crc = crc32fast::hash(payload);
    if crc != expected_crc {
        return Err(ParzError::ChecksumMismatch {
            expected: expected_crc,
            actual: crc,
        });
    }
    if read_u64_le(&trailer[4..12]) != payload.len() as u64
        || read_u64_le(&trailer[12..]) != member.len() as u64
    {
        return Err(ParzError::CompressionError(
            "lzip member sizes do not match the block".to_string(),
        ));
    }

    Ok((
        &member[..LZIP_HEADER_LEN],
        &member[LZIP_HEADER_LEN..trailer_start],
        trailer,
    ))
}

fn read_u32_le(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

#[cfg(feature = "lzip")]
fn lzip_filters(dictionary_size: u32, level: u32) -> Result<xz2::stream::Filters> {
    use xz2::stream::{Filters, LzmaOptions};

    let mut options = LzmaOptions::new_preset(level).map_err(|err| {
        ParzError::CompressionError(format!("lzma preset {level} rejected: {err}"))
    })?;
    options
        .dict_size(dictionary_size)
        .literal_context_bits(3)
        .literal_position_bits(0)
        .position_bits(2);
    let mut filters = Filters::new();
    filters.lzma1(&options);
    Ok(filters)
}

#[cfg(feature = "lzip")]
fn lzma_body(level: u32, payload: &[u8]) -> Result<Vec<u8>> {
    use xz2::stream::{Action, Status, Stream};

    let filters = lzip_filters(dictionary_size(level), level)?;
    // Raw LZMA1 encoding always terminates with the end-of-stream marker lzip requires.
    let mut stream = Stream::new_raw_encoder(&filters)
        .map_err(|err| ParzError::CompressionError(format!("lzma encoder init failed: {err}")))?;
    let mut body = Vec::with_capacity(payload.len() / 2 + 128);

    loop {
        let consumed = stream.total_in() as usize;
        let status = stream
            .process_vec(&payload[consumed..], &mut body, Action::Finish)
            .map_err(|err| ParzError::CompressionError(format!("lzma failed: {err}")))?;
        if matches!(status, Status::StreamEnd) {
            break;
        }
        body.reserve(body.capacity().max(64 * 1024));
    }

    Ok(body)
}

/// Decodes a concatenation of lzip members, one payload per member.
#[cfg(feature = "lzip")]
pub fn decode_members(data: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut members = Vec::new();
    let mut offset = 0usize;
    while offset < data.len() {
        let (payload, member_len) = decode_member(&data[offset..])
            .map_err(|err| err.with_context(format!("lzip member {}", members.len())))?;
        members.push(payload);
        offset += member_len;
    }
    Ok(members)
}

#[cfg(feature = "lzip")]
fn decode_member(data: &[u8]) -> Result<(Vec<u8>, usize)> {
    use xz2::stream::{Action, Status, Stream};

    if data.len() < LZIP_HEADER_LEN + LZIP_TRAILER_LEN
        || data[..4] != LZIP_MAGIC
        || data[4] != LZIP_VERSION
    {
        return Err(ParzError::DecompressionError(
            "missing lzip member header".to_string(),
        ));
    }
    let dictionary_size = decode_dictionary_size(data[5]).ok_or_else(|| {
        ParzError::DecompressionError(format!("invalid dictionary size byte {:#04x}", data[5]))
    })?;

    let filters = lzip_filters(dictionary_size, 6)?;
    let mut stream = Stream::new_raw_decoder(&filters)
        .map_err(|err| ParzError::DecompressionError(format!("lzma decoder init failed: {err}")))?;
    let body = &data[LZIP_HEADER_LEN..];
    let mut payload = Vec::with_capacity(64 * 1024);

    loop {
        let consumed = stream.total_in() as usize;
        let produced = stream.total_out();
        let status = stream
            .process_vec(&body[consumed..], &mut payload, Action::Run)
            .map_err(|err| ParzError::DecompressionError(format!("lzma failed: {err}")))?;
        if matches!(status, Status::StreamEnd) {
            break;
        }
        if payload.len() == payload.capacity() {
            payload.reserve(payload.capacity().max(64 * 1024));
        } else if stream.total_in() as usize == consumed && stream.total_out() == produced {
            return Err(ParzError::DecompressionError(
                "truncated lzip member".to_string(),
            ));
        }
    }

    let body_len = stream.total_in() as usize;
    let trailer_start = LZIP_HEADER_LEN + body_len;
    let member_len = trailer_start + LZIP_TRAILER_LEN;
    if data.len() < member_len {
        return Err(ParzError::DecompressionError(
            "lzip member trailer is truncated".to_string(),
        ));
    }
    let trailer = &data[trailer_start..member_len];

    let expected_crc = read_u32_le(&trailer[..4]);
    let actual_crc = crc32fast::hash(&payload);
    if expected_crc != actual_crc {
        return Err(ParzError::ChecksumMismatch {
            expected: expected_crc,
            actual: actual_crc,
        });
    }
    if read_u64_le(&trailer[4..12]) != payload.len() as u64
        || read_u64_le(&trailer[12..]) != member_len as u64
    {
        return Err(ParzError::DecompressionError(
            "lzip trailer sizes do not match the member".to_string(),
        ));
    }

    Ok((payload, member_len))
}

#[cfg(not(feature = "lzip"))]
pub fn decode_members(_data: &[u8]) -> Result<Vec<Vec<u8>>> {
    Err(super::unavailable(CodecKind::Lzip))
}
