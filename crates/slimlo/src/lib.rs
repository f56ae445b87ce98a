//! SlimLO: crash-resilient DOCX -> PDF conversion for host applications.
//!
//! The conversion itself is delegated to an opaque native engine
//! (LibreOfficeKit) embedded in worker subprocesses; this crate is the
//! process-isolation supervisor around them. A [`Pool`] owns N worker
//! slots, dispatches round-robin under a semaphore, restarts crashed
//! children transparently, recycles workers after a configurable number
//! of conversions, and kills anything that outlives its deadline.
//!
//! ```no_run
//! use slimlo::{CancellationToken, ConvertRequest, Pool, PoolConfig};
//!
//! # async fn run() -> Result<(), slimlo::PoolError> {
//! let mut config = PoolConfig::new("/usr/local/bin/slimlo_worker",
//!                                  "/usr/lib/libreoffice/program");
//! config.workers = 4;
//! let pool = Pool::new(config)?;
//!
//! let result = pool
//!     .execute(
//!         ConvertRequest::new("/tmp/report.docx", "/tmp/report.pdf"),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! assert!(result.success);
//! pool.dispose().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod paths;
pub mod pool;
pub mod result;
pub mod supervisor;

pub use config::{PoolConfig, DEFAULT_TIMEOUT};
pub use error::PoolError;
pub use pool::{BufferRequest, ConvertRequest, Pool};
pub use result::ConversionResult;

// The wire vocabulary doubles as the host-facing one.
pub use slimlo_protocol::{
    DiagCategory, DiagSeverity, Diagnostic, DocFormat, ErrorCode, PdfOptions,
};

// Cancellation primitive threaded through every pool operation.
pub use tokio_util::sync::CancellationToken;
