use std::time::Instant;

pub mod tags;
pub mod worker;

pub use worker::{DefaultWorkerTelemetry, WorkerTelemetry};

/// Converts elapsed time since `started_at` to microseconds, clamped to `u64::MAX`.
#[inline]
pub fn elapsed_us(started_at: Instant) -> u64 {
    started_at.elapsed().as_micros().min(u64::MAX as u128) as u64
}

/// Emits a per-block progress event at INFO when `verbose` is set, DEBUG otherwise.
macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::info!(target: $crate::telemetry::tags::TARGET_PIPELINE, $($arg)+);
        } else {
            tracing::debug!(target: $crate::telemetry::tags::TARGET_PIPELINE, $($arg)+);
        }
    };
}

pub(crate) use progress;
