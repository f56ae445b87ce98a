//! Engine capability seam.
//!
//! The message loop only ever talks to [`Engine`]/[`EngineDocument`]; the
//! native LibreOfficeKit bindings live behind it in [`lok`], and [`stub`]
//! provides a deterministic stand-in for smoke tests. One engine instance
//! exists per worker process, and calls are never made concurrently.

pub mod lok;
pub mod stub;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be brought up from the resource directory.
    #[error("engine initialization failed: {0}")]
    Init(String),
    /// The engine rejected the document; message is engine-provided.
    #[error("{0}")]
    Load(String),
    /// The engine failed to export; message is engine-provided.
    #[error("{0}")]
    Export(String),
}

/// What the worker requires of the engine it embeds.
pub trait Engine {
    /// Engine-reported build string, sent in the `ready` handshake.
    fn version(&self) -> String;

    /// Load a document from a `file:` URL. `load_options` uses the
    /// engine's JSON option syntax (e.g. a password for protected files).
    fn load_document(
        &mut self,
        url: &str,
        load_options: Option<&str>,
    ) -> Result<Box<dyn EngineDocument>, EngineError>;
}

/// A loaded document. Dropped handles release their engine resources.
pub trait EngineDocument {
    /// Export to `url` with the named filter and the engine's JSON filter
    /// options.
    fn save_as(
        &mut self,
        url: &str,
        filter: &str,
        filter_options: Option<&str>,
    ) -> Result<(), EngineError>;
}
