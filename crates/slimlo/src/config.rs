//! Pool configuration (plain data).

use std::path::PathBuf;
use std::time::Duration;

use crate::error::PoolError;

/// Default per-conversion timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Worker executable to spawn.
    pub worker_path: PathBuf,
    /// Engine program directory (shared libraries + resource tree).
    pub resource_path: PathBuf,
    /// Extra font directories exposed to the engine, in order.
    pub font_dirs: Vec<PathBuf>,
    /// Maximum concurrent workers (N >= 1).
    pub workers: usize,
    /// Tear a worker down after this many conversions; 0 = never.
    pub recycle_after: u64,
    /// Per-conversion timeout.
    pub timeout: Duration,
    /// Additional environment for the children, applied last.
    pub extra_env: Vec<(String, String)>,
}

impl PoolConfig {
    pub fn new(worker_path: impl Into<PathBuf>, resource_path: impl Into<PathBuf>) -> Self {
        Self {
            worker_path: worker_path.into(),
            resource_path: resource_path.into(),
            font_dirs: Vec::new(),
            workers: 1,
            recycle_after: 0,
            timeout: DEFAULT_TIMEOUT,
            extra_env: Vec::new(),
        }
    }

    pub(crate) fn validate(&self) -> Result<(), PoolError> {
        if self.workers == 0 {
            return Err(PoolError::Config(
                "worker count must be at least 1".to_string(),
            ));
        }
        if !self.worker_path.is_file() {
            return Err(PoolError::Config(format!(
                "worker executable not found: {}",
                self.worker_path.display()
            )));
        }
        if !self.resource_path.is_dir() {
            return Err(PoolError::Config(format!(
                "engine resource directory not found: {}",
                self.resource_path.display()
            )));
        }
        if self.timeout.is_zero() {
            return Err(PoolError::Config(
                "conversion timeout must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
