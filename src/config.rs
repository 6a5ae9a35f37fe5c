use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;
pub const DEFAULT_PAGE_SIZE: u32 = 5000;
pub const DEFAULT_RESULT_DIR: &str = "/tmp/settlements";

/// Tuning of the settlement engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub page_size: u32,
    pub result_dir: PathBuf,
    /// Period of the stalled-job sweep. `None` disables it.
    pub sweep_interval: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            page_size: DEFAULT_PAGE_SIZE,
            result_dir: PathBuf::from(DEFAULT_RESULT_DIR),
            sweep_interval: None,
        }
    }
}

pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}
