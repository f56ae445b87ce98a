//! Deterministic stand-in for the native engine.
//!
//! Selected with `SLIMLO_ENGINE=stub` in the worker's environment. It lets
//! a deployment be smoke-tested (and the e2e suite run) without a
//! LibreOffice install: inputs are plain text, the "PDF" output is a
//! `%PDF` stamp carrying the worker's pid, and directive lines in the
//! input drive the conversion outcome:
//!
//! - `sleep:<ms>`       stall inside the engine call
//! - `crash`            abort the process mid-conversion
//! - `fail-load:<msg>`  reject the document at load time
//! - `fail-export:<msg>` fail the export
//! - `warn:...`         echo the line to stderr (exercises diagnostics)

use std::thread;
use std::time::Duration;

use tracing::debug;

use super::{Engine, EngineDocument, EngineError};
use crate::convert::url_to_path;

pub struct StubEngine;

impl StubEngine {
    pub fn init(resource_path: &str) -> Result<Self, EngineError> {
        debug!("stub engine up (resource path {})", resource_path);
        Ok(StubEngine)
    }
}

impl Engine for StubEngine {
    fn version(&self) -> String {
        format!("slimlo-stub {}", env!("CARGO_PKG_VERSION"))
    }

    fn load_document(
        &mut self,
        url: &str,
        _load_options: Option<&str>,
    ) -> Result<Box<dyn EngineDocument>, EngineError> {
        let path = url_to_path(url)
            .ok_or_else(|| EngineError::Load(format!("not a file URL: {}", url)))?;
        let bytes = std::fs::read(&path)
            .map_err(|e| EngineError::Load(format!("failed to open {}: {}", path.display(), e)))?;

        let mut doc = StubDocument {
            src_bytes: bytes.len(),
            sleep: None,
            crash: false,
            fail_export: None,
            warn_lines: Vec::new(),
        };

        for line in String::from_utf8_lossy(&bytes).lines() {
            let line = line.trim();
            if let Some(ms) = line.strip_prefix("sleep:") {
                doc.sleep = ms.parse().ok().map(Duration::from_millis);
            } else if line == "crash" {
                doc.crash = true;
            } else if let Some(msg) = line.strip_prefix("fail-load:") {
                return Err(EngineError::Load(msg.to_string()));
            } else if let Some(msg) = line.strip_prefix("fail-export:") {
                doc.fail_export = Some(msg.to_string());
            } else if line.starts_with("warn:") {
                doc.warn_lines.push(line.to_string());
            }
        }

        Ok(Box::new(doc))
    }
}

struct StubDocument {
    src_bytes: usize,
    sleep: Option<Duration>,
    crash: bool,
    fail_export: Option<String>,
    warn_lines: Vec<String>,
}

impl EngineDocument for StubDocument {
    fn save_as(
        &mut self,
        url: &str,
        filter: &str,
        _filter_options: Option<&str>,
    ) -> Result<(), EngineError> {
        for line in &self.warn_lines {
            eprintln!("{}", line);
        }
        if let Some(pause) = self.sleep {
            thread::sleep(pause);
        }
        if self.crash {
            // Simulates the engine taking the whole process down.
            std::process::abort();
        }
        if let Some(msg) = &self.fail_export {
            return Err(EngineError::Export(msg.clone()));
        }

        let path = url_to_path(url)
            .ok_or_else(|| EngineError::Export(format!("not a file URL: {}", url)))?;
        let body = format!(
            "%PDF-1.7\n%slimlo-stub pid={} filter={} src_bytes={}\n%%EOF\n",
            std::process::id(),
            filter,
            self.src_bytes
        );
        std::fs::write(&path, body)
            .map_err(|e| EngineError::Export(format!("failed to write {}: {}", path.display(), e)))
    }
}
