pub mod reader;

pub use reader::{BlockReader, effective_block_size};
