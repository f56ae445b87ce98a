//! SlimLO worker child.
//!
//! Spawned by the host library with stdin/stdout as the protocol pipe and
//! stderr reserved for engine diagnostics. Takes no command-line
//! arguments: every setting arrives in the `init` request.
//!
//! `SLIMLO_ENGINE=stub` swaps in the deterministic stub engine so a
//! deployment can be smoke-tested without a LibreOffice install.
//! `SLIMLO_WORKER_LOG=1` enables tracing to the shared log directory.

use std::io;
use std::path::Path;

use slimlo_worker::engine::{lok::LokEngine, stub::StubEngine, Engine, EngineError};
use slimlo_worker::msg_loop::{EngineFactory, MsgLoop};
use tracing::debug;

fn main() {
    // argv is deliberately ignored; configuration arrives over the pipe.
    if std::env::var("SLIMLO_WORKER_LOG").as_deref() == Ok("1") {
        let _ = slimlo_logging::init_logging(slimlo_logging::LogConfig {
            app_name: "slimlo_worker",
            verbose: false,
            stderr: false,
        });
    }

    let factory: EngineFactory = Box::new(
        |resource_path: &str, font_paths: &[String]| -> Result<Box<dyn Engine>, EngineError> {
            debug!(
                "initializing engine (resource {}, {} font dirs)",
                resource_path,
                font_paths.len()
            );
            if std::env::var("SLIMLO_ENGINE").as_deref() == Ok("stub") {
                Ok(Box::new(StubEngine::init(resource_path)?))
            } else {
                Ok(Box::new(LokEngine::init(Path::new(resource_path))?))
            }
        },
    );

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    let code = MsgLoop::new(stdin, stdout, factory).run();
    std::process::exit(code);
}
