mod pool;

pub use pool::{Processor, WorkerPool, dispatch};
