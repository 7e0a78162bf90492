pub mod pool;
pub mod processor;

pub use pool::WorkerPool;
pub use processor::BrickLayersProcessor;
