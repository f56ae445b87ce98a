use thiserror::Error;

/// Errors surfaced by the frame codec.
///
/// End-of-stream is deliberately *not* an error: `read_frame` reports it as
/// `Ok(None)` so callers can tell "the peer went away" apart from "the
/// conversation is corrupt".
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("declared frame length {len} exceeds the {max} byte cap")]
    FrameTooLarge { len: u64, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
