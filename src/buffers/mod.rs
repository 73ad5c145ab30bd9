pub mod pool;

pub use pool::{Scratch, ScratchPool};
