#![allow(dead_code)]

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use parz_core::codec::{CodecBackend, GzipCodec};
use parz_core::{
    BackendKind, Block, Codec, CodecFactory, CodecKind, CompressedFrame, ParzError, Result,
};
use tempfile::NamedTempFile;

pub type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

/// Per-block behaviour injected into [`ScriptedCodec`].
#[derive(Clone, Default)]
pub struct Script {
    pub delay: Option<Arc<dyn Fn(u64) -> Duration + Send + Sync>>,
    pub fail_on: Option<u64>,
    pub panic_on: Option<u64>,
}

impl Script {
    pub fn with_delay(delay: impl Fn(u64) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            delay: Some(Arc::new(delay)),
            ..Self::default()
        }
    }

    pub fn failing_on(index: u64) -> Self {
        Self {
            fail_on: Some(index),
            ..Self::default()
        }
    }
}

/// Native gzip codec with scripted delays and failures.
pub struct ScriptedCodec {
    codec_id: usize,
    inner: GzipCodec,
    script: Script,
    processed: Arc<Mutex<Vec<(usize, u64)>>>,
}

impl Codec for ScriptedCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Gzip
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Native
    }

    fn header(&self) -> bytes::Bytes {
        self.inner.header()
    }

    fn trailer(&self, payload: &[u8], body_len: usize) -> Vec<u8> {
        self.inner.trailer(payload, body_len)
    }

    fn compress_body(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.inner.compress_body(payload)
    }

    fn compress(&mut self, block: &Block) -> Result<CompressedFrame> {
        if let Some(delay) = &self.script.delay {
            thread::sleep(delay(block.index));
        }
        if self.script.panic_on == Some(block.index) {
            panic!("scripted panic on block {}", block.index);
        }
        if self.script.fail_on == Some(block.index) {
            return Err(ParzError::CompressionError(format!(
                "scripted failure on block {}",
                block.index
            )));
        }

        let frame = self.inner.compress(block)?;
        self.processed
            .lock()
            .expect("processed log mutex poisoned")
            .push((self.codec_id, block.index));
        Ok(frame)
    }
}

/// Factory handing out [`ScriptedCodec`]s and counting how many were built.
#[derive(Clone)]
pub struct ScriptedFactory {
    pub level: u32,
    pub script: Script,
    pub created: Arc<AtomicUsize>,
    /// `(codec id, block index)` in completion order.
    pub processed: Arc<Mutex<Vec<(usize, u64)>>>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            level: 1,
            script,
            created: Arc::new(AtomicUsize::new(0)),
            processed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::Acquire)
    }

    pub fn processed(&self) -> Vec<(usize, u64)> {
        self.processed
            .lock()
            .expect("processed log mutex poisoned")
            .clone()
    }
}

impl CodecFactory for ScriptedFactory {
    fn kind(&self) -> CodecKind {
        CodecKind::Gzip
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Native
    }

    fn create(&self) -> Result<Box<dyn Codec>> {
        let codec_id = self.created.fetch_add(1, Ordering::AcqRel);
        Ok(Box::new(ScriptedCodec {
            codec_id,
            inner: GzipCodec::new(self.level, &CodecBackend::Native)?,
            script: self.script.clone(),
            processed: Arc::clone(&self.processed),
        }))
    }
}

/// Factory whose codec construction always fails.
pub struct UnavailableFactory;

impl CodecFactory for UnavailableFactory {
    fn kind(&self) -> CodecKind {
        CodecKind::Lzip
    }

    fn backend(&self) -> BackendKind {
        BackendKind::External
    }

    fn create(&self) -> Result<Box<dyn Codec>> {
        Err(ParzError::BackendUnavailable {
            codec: CodecKind::Lzip,
            reason: "no lzip in this test".to_string(),
        })
    }
}

/// Deterministic pseudo-random bytes (xorshift64*), effectively incompressible.
pub fn random_bytes(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state >> 12;
        state ^= state << 25;
        state ^= state >> 27;
        out.extend_from_slice(&state.wrapping_mul(0x2545_f491_4f6c_dd1d).to_le_bytes());
    }
    out.truncate(len);
    out
}

pub fn text_bytes(len: usize) -> Vec<u8> {
    let line = b"parallel block compression integration line\n";
    line.iter().copied().cycle().take(len).collect()
}

pub fn write_fixture(data: &[u8]) -> std::result::Result<NamedTempFile, Box<dyn std::error::Error>> {
    let mut file = NamedTempFile::new()?;
    file.write_all(data)?;
    file.flush()?;
    Ok(file)
}

/// Whether an external program can be spawned on this machine.
pub fn program_available(program: &str) -> bool {
    std::process::Command::new(program)
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok()
}
