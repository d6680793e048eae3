pub mod worker_pool;

pub use worker_pool::{
    Completion, PoolRuntimeSnapshot, WorkerPool, WorkerRuntimeSnapshot, WorkerState,
};
