use thiserror::Error;

/// Host-side errors. Conversion failures are *not* errors — they come back
/// as failed [`crate::ConversionResult`]s; this enum covers programmer
/// mistakes and caller-driven aborts.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was used after `dispose`.
    #[error("pool has been disposed")]
    Disposed,

    /// The caller's cancellation token fired mid-conversion.
    #[error("conversion cancelled")]
    Cancelled,

    /// Rejected at pool construction.
    #[error("invalid pool configuration: {0}")]
    Config(String),

    /// `warm_up` could not bring a worker to the ready state.
    #[error("worker start failed: {0}")]
    Start(String),
}
