//! SlimLO worker internals.
//!
//! The worker is a child process spawned by the host library. It embeds
//! exactly one engine instance and serves conversion requests over a
//! length-prefixed frame protocol on stdin/stdout. Engine stderr is
//! captured around each conversion and parsed into structured diagnostics
//! that travel back in the response frame.

pub mod convert;
pub mod diag;
pub mod engine;
pub mod msg_loop;
pub mod stderr;
