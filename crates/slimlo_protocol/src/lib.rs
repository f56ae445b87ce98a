//! Wire contract for Host <-> Worker communication.
//!
//! Every message on the pipe is one *frame*:
//!
//! ```text
//! [LEN:4, u32 little-endian][LEN bytes of payload]
//! ```
//!
//! The payload is opaque at this layer: UTF-8 JSON for control frames, raw
//! bytes for document/PDF payloads. Control frames are tagged objects
//! (`"type"` key, lowercase snake_case), and binary frames are always
//! announced by the control frame that precedes them (`convert_buffer`
//! carries `data_size`, a successful `buffer_result` carries `data_size`).
//!
//! A declared length above [`MAX_FRAME_LEN`] means the stream has desynced
//! and the conversation must be torn down. A short read is not an error:
//! it is reported as end-of-stream, which callers interpret as "the peer
//! died".

pub mod error;
pub mod framing;
pub mod wire;

pub use error::ProtocolError;
pub use framing::{
    read_frame, read_frame_async, write_frame, write_frame_async, MAX_FRAME_LEN,
};
pub use wire::{
    Diagnostic, DiagCategory, DiagSeverity, DocFormat, ErrorCode, PdfOptions, Request, Response,
};
