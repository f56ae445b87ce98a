//! Shared logging setup for the SlimLO binaries.
//!
//! The worker child keeps its stderr clear for engine diagnostics, so file
//! output is the primary sink; the CLI additionally logs to stderr.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "slimlo=info,slimlo_worker=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration shared by SlimLO binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Mirror log output to stderr. Must stay off in the worker child,
    /// whose stderr carries engine diagnostics.
    pub stderr: bool,
}

/// Initialize tracing with a size-capped file writer and an optional
/// stderr layer.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let log_dir = ensure_logs_dir().context("Failed to ensure log directory")?;
    let writer = CappedFileWriter::open(log_dir, config.app_name)
        .context("Failed to open log file")?;

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if config.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new(DEFAULT_LOG_FILTER)
        }
    });

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(file_filter);

    if config.stderr {
        let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if config.verbose { "debug" } else { "warn" })
        });
        tracing_subscriber::registry()
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_filter(stderr_filter),
            )
            .init();
    } else {
        tracing_subscriber::registry().with(file_layer).init();
    }

    Ok(())
}

/// SlimLO home directory: `$SLIMLO_HOME` or `~/.slimlo`.
pub fn slimlo_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("SLIMLO_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".slimlo")
}

/// Logs directory: `<home>/logs`.
pub fn logs_dir() -> PathBuf {
    slimlo_home().join("logs")
}

/// Ensure the logs directory exists.
pub fn ensure_logs_dir() -> Result<PathBuf> {
    let logs = logs_dir();
    fs::create_dir_all(&logs)
        .with_context(|| format!("Failed to create logs directory: {}", logs.display()))?;
    Ok(logs)
}

/// Append-only log file with a size cap. When the active file grows past
/// the cap, it is shifted to `<name>.log.1` (older shifts renumber up to
/// [`MAX_LOG_FILES`]) and a fresh file is started.
struct CappedFile {
    dir: PathBuf,
    base_name: String,
    file: File,
    written: u64,
}

impl CappedFile {
    fn open(dir: PathBuf, base_name: String) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}.log", base_name));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            dir,
            base_name,
            file,
            written,
        })
    }

    fn shift(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let indexed = |i: usize| self.dir.join(format!("{}.log.{}", self.base_name, i));
        let oldest = indexed(MAX_LOG_FILES - 1);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for i in (1..MAX_LOG_FILES - 1).rev() {
            if indexed(i).exists() {
                fs::rename(indexed(i), indexed(i + 1))?;
            }
        }

        let current = self.dir.join(format!("{}.log", self.base_name));
        fs::rename(&current, indexed(1))?;

        self.file = OpenOptions::new().create(true).append(true).open(&current)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for CappedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > MAX_LOG_FILE_SIZE {
            self.shift()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[derive(Clone)]
struct CappedFileWriter {
    inner: Arc<Mutex<CappedFile>>,
}

impl CappedFileWriter {
    fn open(dir: PathBuf, app_name: &str) -> Result<Self> {
        let base = sanitize_name(app_name);
        let file = CappedFile::open(dir, base)
            .with_context(|| format!("Failed to open log file for {}", app_name))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
        })
    }
}

struct CappedFileGuard {
    inner: Arc<Mutex<CappedFile>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CappedFileWriter {
    type Writer = CappedFileGuard;

    fn make_writer(&'a self) -> Self::Writer {
        CappedFileGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for CappedFileGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("slimlo_worker"), "slimlo_worker");
        assert_eq!(sanitize_name("a b/c"), "a_b_c");
    }

    #[test]
    fn test_capped_file_shifts_at_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let mut file = CappedFile::open(tmp.path().to_path_buf(), "t".into()).unwrap();
        file.written = MAX_LOG_FILE_SIZE; // force the next write over the cap
        file.write_all(b"line\n").unwrap();
        file.flush().unwrap();

        assert!(tmp.path().join("t.log").exists());
        assert!(tmp.path().join("t.log.1").exists());
        assert_eq!(fs::read(tmp.path().join("t.log")).unwrap(), b"line\n");
    }
}
