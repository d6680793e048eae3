/// Tracing target for controller and dispatch events.
pub const TARGET_PIPELINE: &str = "parz.pipeline";
/// Tracing target for worker lifecycle events.
pub const TARGET_WORKER: &str = "parz.worker";
/// Tracing target for block reader events.
pub const TARGET_READER: &str = "parz.reader";
/// Tracing target for reorder/combine events.
pub const TARGET_COMBINER: &str = "parz.combiner";
/// Tracing target for codec and backend selection events.
pub const TARGET_CODEC: &str = "parz.codec";
