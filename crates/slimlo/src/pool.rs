//! The worker pool: dispatch, crash recovery, recycling, lifecycle.
//!
//! Concurrency is the dual structure of a pool-wide semaphore (caps
//! in-flight conversions at N) and a per-slot mutex (serializes one slot's
//! conversion against its own start/restart/recycle). Dispatch picks slots
//! round-robin off an atomic counter; wraparound is harmless because the
//! index is reduced modulo N.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use slimlo_protocol::{DocFormat, ErrorCode, PdfOptions, Request};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::result::ConversionResult;
use crate::supervisor::{ConvertOutcome, StartError, Supervisor};

/// File-path conversion request. The input is read and the output written
/// by the worker process; no payload bytes transit the pipe.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: DocFormat,
    pub options: PdfOptions,
}

impl ConvertRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            format: DocFormat::Docx,
            options: PdfOptions::default(),
        }
    }
}

/// In-memory conversion request; document bytes go in, PDF bytes come out.
#[derive(Debug, Clone)]
pub struct BufferRequest {
    pub format: DocFormat,
    pub options: PdfOptions,
}

impl Default for BufferRequest {
    fn default() -> Self {
        Self {
            format: DocFormat::Docx,
            options: PdfOptions::default(),
        }
    }
}

struct WorkerSlot {
    index: usize,
    supervisor: Mutex<Option<Supervisor>>,
}

/// A pool of supervised conversion workers.
///
/// `dispose` must be called on host shutdown; the kill-on-drop flag on the
/// children is only a backstop against leaks.
pub struct Pool {
    config: PoolConfig,
    slots: Vec<WorkerSlot>,
    permits: Semaphore,
    rr: AtomicUsize,
    next_id: AtomicU64,
    disposed: AtomicBool,
    shutdown: CancellationToken,
    engine_version: StdMutex<Option<String>>,
}

impl Pool {
    /// Validate the configuration and build an idle pool. Workers start
    /// lazily on first dispatch (or eagerly via [`Pool::warm_up`]).
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let slots = (0..config.workers)
            .map(|index| WorkerSlot {
                index,
                supervisor: Mutex::new(None),
            })
            .collect();
        let permits = Semaphore::new(config.workers);
        info!(
            "pool ready: {} worker slot(s), timeout {:?}, recycle after {}",
            config.workers, config.timeout, config.recycle_after
        );
        Ok(Self {
            config,
            slots,
            permits,
            rr: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            disposed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            engine_version: StdMutex::new(None),
        })
    }

    /// File-path conversion.
    pub async fn execute(
        &self,
        request: ConvertRequest,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, PoolError> {
        self.check_open()?;
        if request.format != DocFormat::Docx {
            return Ok(ConversionResult::failure(
                ErrorCode::InvalidFormat,
                format!(
                    "unsupported input format: {:?} (code {})",
                    request.format,
                    request.format.code()
                ),
            ));
        }
        let input = absolutize(&request.input);
        if !input.is_file() {
            return Ok(ConversionResult::failure(
                ErrorCode::InputNotFound,
                format!("input file not found: {}", input.display()),
            ));
        }

        let wire = Request::Convert {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            input: Some(input.to_string_lossy().into_owned()),
            output: Some(absolutize(&request.output).to_string_lossy().into_owned()),
            format: request.format.code(),
            options: Some(request.options),
        };
        self.dispatch(wire, None, cancel).await
    }

    /// In-memory conversion. The result carries the PDF bytes on success.
    pub async fn execute_buffer(
        &self,
        request: BufferRequest,
        doc: &[u8],
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, PoolError> {
        self.check_open()?;
        if request.format != DocFormat::Docx {
            return Ok(ConversionResult::failure(
                ErrorCode::InvalidFormat,
                format!(
                    "unsupported input format: {:?} (code {})",
                    request.format,
                    request.format.code()
                ),
            ));
        }
        if doc.is_empty() {
            return Ok(ConversionResult::failure(
                ErrorCode::InvalidArgument,
                "empty input buffer",
            ));
        }
        if doc.len() > slimlo_protocol::MAX_FRAME_LEN {
            return Ok(ConversionResult::failure(
                ErrorCode::InvalidArgument,
                format!(
                    "document of {} bytes exceeds the {} byte frame cap",
                    doc.len(),
                    slimlo_protocol::MAX_FRAME_LEN
                ),
            ));
        }

        let wire = Request::ConvertBuffer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            format: request.format.code(),
            data_size: doc.len() as u64,
            options: Some(request.options),
        };
        self.dispatch(wire, Some(doc), cancel).await
    }

    /// Eagerly bring every slot to a running, initialized child.
    pub async fn warm_up(&self, cancel: &CancellationToken) -> Result<(), PoolError> {
        self.check_open()?;
        for slot in &self.slots {
            let mut guard = slot.supervisor.lock().await;
            match self.ensure_alive(slot.index, &mut guard, cancel).await {
                Ok(()) => {}
                Err(StartError::Cancelled) => return Err(PoolError::Cancelled),
                Err(e) => return Err(PoolError::Start(e.to_string())),
            }
        }
        Ok(())
    }

    /// Engine version reported by the first successfully started worker.
    pub fn engine_version(&self) -> Option<String> {
        self.engine_version
            .lock()
            .map(|cached| cached.clone())
            .unwrap_or_default()
    }

    pub fn worker_count(&self) -> usize {
        self.config.workers
    }

    /// Stop every worker (graceful quit, then kill) and refuse further
    /// work. In-flight conversions observe cancellation. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("disposing pool");
        self.shutdown.cancel();
        self.permits.close();
        for slot in &self.slots {
            let mut guard = slot.supervisor.lock().await;
            if let Some(mut sup) = guard.take() {
                sup.dispose().await;
            }
        }
    }

    fn check_open(&self) -> Result<(), PoolError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(PoolError::Disposed);
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        wire: Request,
        doc: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ConversionResult, PoolError> {
        // One permit for the whole call caps concurrency at N.
        let _permit = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return Err(PoolError::Disposed),
            _ = cancel.cancelled() => return Err(PoolError::Cancelled),
            permit = self.permits.acquire() => permit.map_err(|_| PoolError::Disposed)?,
        };

        let index = self.rr.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = &self.slots[index];
        let mut guard = slot.supervisor.lock().await;

        match self.ensure_alive(slot.index, &mut guard, cancel).await {
            Ok(()) => {}
            Err(StartError::Cancelled) => return Err(PoolError::Cancelled),
            // Start failures are results, not panics: the caller decides.
            Err(e) => {
                return Ok(ConversionResult::failure(
                    ErrorCode::InitFailed,
                    e.to_string(),
                ))
            }
        }
        let sup = guard.as_mut().expect("slot populated by ensure_alive");

        let outcome = sup
            .convert(&wire, doc, self.config.timeout, cancel, &self.shutdown)
            .await;

        let result = match outcome {
            ConvertOutcome::Completed(result) => Ok(result),
            ConvertOutcome::Crashed { exit } => Ok(ConversionResult::failure(
                ErrorCode::Unknown,
                match exit {
                    Some(code) => format!(
                        "worker crashed (exit code {}); the input document may be malformed",
                        code
                    ),
                    None => "worker crashed (terminated by signal); the input document may be \
                             malformed"
                        .to_string(),
                },
            )),
            ConvertOutcome::TimedOut => Ok(ConversionResult::failure(
                ErrorCode::Unknown,
                format!("conversion timed out after {:?}", self.config.timeout),
            )),
            ConvertOutcome::Desynced(detail) => Ok(ConversionResult::failure(
                ErrorCode::Unknown,
                format!("worker protocol failure: {}", detail),
            )),
            ConvertOutcome::Cancelled => {
                if let Some(mut sup) = guard.take() {
                    sup.dispose().await;
                }
                return Err(if self.shutdown.is_cancelled() {
                    PoolError::Disposed
                } else {
                    PoolError::Cancelled
                });
            }
        };

        // Recycling bounds engine memory growth; a dead child frees its
        // slot for a fresh spawn on the next dispatch.
        let recycle = self.config.recycle_after;
        let teardown = match guard.as_mut() {
            Some(sup) => (recycle > 0 && sup.conversions() >= recycle) || !sup.is_alive(),
            None => false,
        };
        if teardown {
            debug!("slot {}: tearing down worker", slot.index);
            if let Some(mut sup) = guard.take() {
                sup.dispose().await;
            }
        }

        result
    }

    /// Lazy start / restart-after-crash for one slot. Caches the engine
    /// version off the first successful start.
    async fn ensure_alive(
        &self,
        index: usize,
        guard: &mut Option<Supervisor>,
        cancel: &CancellationToken,
    ) -> Result<(), StartError> {
        if let Some(sup) = guard.as_mut() {
            if sup.is_alive() && sup.initialized() {
                return Ok(());
            }
        }
        if let Some(mut old) = guard.take() {
            debug!("slot {}: clearing dead worker", index);
            old.dispose().await;
        }

        let sup = Supervisor::start(&self.config, index, cancel).await?;
        if let Ok(mut cached) = self.engine_version.lock() {
            if cached.is_none() {
                *cached = Some(sup.version().to_string());
            }
        }
        *guard = Some(sup);
        Ok(())
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_wraps_modulo_n() {
        let rr = AtomicUsize::new(usize::MAX - 1);
        let n = 3;
        // Wraparound must keep producing valid indices.
        let a = rr.fetch_add(1, Ordering::Relaxed) % n;
        let b = rr.fetch_add(1, Ordering::Relaxed) % n;
        let c = rr.fetch_add(1, Ordering::Relaxed) % n;
        assert!(a < n && b < n && c < n);
    }

    #[test]
    fn test_absolutize_keeps_absolute_paths() {
        let abs = if cfg!(windows) {
            PathBuf::from(r"C:\data\a.docx")
        } else {
            PathBuf::from("/data/a.docx")
        };
        assert_eq!(absolutize(&abs), abs);
    }

    #[test]
    fn test_absolutize_anchors_relative_paths() {
        let rel = Path::new("a.docx");
        let resolved = absolutize(rel);
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("a.docx"));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected_at_construction() {
        let config = PoolConfig::new("/nonexistent/worker", "/nonexistent/program");
        assert!(matches!(Pool::new(config), Err(PoolError::Config(_))));
    }
}
