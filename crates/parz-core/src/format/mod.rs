pub mod combiner;
pub mod reorder;

pub use combiner::Combiner;
pub use reorder::ReorderBuffer;
