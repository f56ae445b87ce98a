//! One supervised worker child.
//!
//! The supervisor owns a child process and both ends of its protocol pipe.
//! It spawns the child with the engine's environment discipline, performs
//! the init handshake, runs framed conversions under a deadline, and tears
//! the child down gracefully (quit frame, bounded wait) or forcefully
//! (kill) when it misbehaves.
//!
//! The pool serializes access: at most one conversion is in flight per
//! supervisor at any time.

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slimlo_protocol::{read_frame_async, write_frame_async, ErrorCode, Request, Response};
use tempfile::TempDir;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::result::ConversionResult;

/// Budget for the init handshake; engine bring-up is slow on cold caches.
const START_TIMEOUT: Duration = Duration::from_secs(60);

/// Wait after a `quit` frame before resorting to kill.
const QUIT_GRACE: Duration = Duration::from_secs(5);

/// Post-kill wait for the exit status.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

/// Cap on the stderr tail kept for startup errors and crash forensics.
const STDERR_TAIL_CAP: usize = 64 * 1024;

#[cfg(target_os = "macos")]
const LIB_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(windows)]
const LIB_PATH_VAR: &str = "PATH";
#[cfg(all(unix, not(target_os = "macos")))]
const LIB_PATH_VAR: &str = "LD_LIBRARY_PATH";

#[cfg(windows)]
const HOME_VAR: &str = "USERPROFILE";
#[cfg(not(windows))]
const HOME_VAR: &str = "HOME";

const MISSING_LIB_PHRASES: &[&str] = &[
    "error while loading shared libraries",
    "cannot open shared object file",
    "Library not loaded",
];

#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to spawn worker {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("worker initialization failed: {message}{hint}")]
    Refused { message: String, hint: String },
    #[error("worker exited during startup ({status}); stderr:\n{stderr}")]
    Died { status: String, stderr: String },
    #[error("worker initialization timed out after {0:?}")]
    Timeout(Duration),
    #[error("worker start cancelled")]
    Cancelled,
    #[error("worker startup I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("worker startup protocol failure: {0}")]
    Protocol(#[from] slimlo_protocol::ProtocolError),
    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// How one conversion attempt ended, before the pool translates it into a
/// caller-facing result.
#[derive(Debug)]
pub enum ConvertOutcome {
    /// The worker answered; failure results are still "completed".
    Completed(ConversionResult),
    /// The pipe closed mid-conversation.
    Crashed { exit: Option<i32> },
    /// The deadline fired; the child has been killed.
    TimedOut,
    /// A cancellation token fired; the child has been killed.
    Cancelled,
    /// The stream desynced (oversized frame, unparseable or mismatched
    /// response); the child has been killed.
    Desynced(String),
}

pub struct Supervisor {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr_tail: Arc<Mutex<String>>,
    gobbler: JoinHandle<()>,
    // Engine scratch state lives here; removed when the supervisor goes.
    profile_dir: TempDir,
    initialized: bool,
    conversions: u64,
    version: String,
    disposed: bool,
}

impl Supervisor {
    /// Spawn a child and run the init handshake.
    pub async fn start(
        config: &PoolConfig,
        slot: usize,
        cancel: &CancellationToken,
    ) -> Result<Self, StartError> {
        let profile_dir = tempfile::Builder::new()
            .prefix("slimlo-profile-")
            .tempdir()?;

        let mut cmd = Command::new(&config.worker_path);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a kill can take any engine helpers with it.
        #[cfg(unix)]
        cmd.process_group(0);
        #[cfg(windows)]
        cmd.creation_flags(0x0800_0000); // CREATE_NO_WINDOW
        apply_environment(&mut cmd, config, profile_dir.path());

        let mut child = cmd.spawn().map_err(|source| StartError::Spawn {
            path: config.worker_path.display().to_string(),
            source,
        })?;
        debug!("slot {}: spawned worker pid {:?}", slot, child.id());

        let stdin = child.stdin.take().expect("stdin is piped");
        let stdout = child.stdout.take().expect("stdout is piped");
        let stderr = child.stderr.take().expect("stderr is piped");
        let stderr_tail = Arc::new(Mutex::new(String::new()));
        let gobbler = tokio::spawn(gobble_stderr(stderr, Arc::clone(&stderr_tail)));

        let mut sup = Self {
            child,
            stdin,
            stdout,
            stderr_tail,
            gobbler,
            profile_dir,
            initialized: false,
            conversions: 0,
            version: String::new(),
            disposed: false,
        };

        match sup.handshake(config, cancel).await {
            Ok(version) => {
                info!("slot {}: worker ready ({})", slot, version);
                sup.version = version;
                sup.initialized = true;
                Ok(sup)
            }
            Err(e) => {
                sup.dispose().await;
                Err(e)
            }
        }
    }

    async fn handshake(
        &mut self,
        config: &PoolConfig,
        cancel: &CancellationToken,
    ) -> Result<String, StartError> {
        let init = Request::Init {
            resource_path: Some(config.resource_path.to_string_lossy().into_owned()),
            font_paths: if config.font_dirs.is_empty() {
                None
            } else {
                Some(
                    config
                        .font_dirs
                        .iter()
                        .map(|d| d.to_string_lossy().into_owned())
                        .collect(),
                )
            },
        };
        write_frame_async(&mut self.stdin, &serde_json::to_vec(&init)?).await?;

        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StartError::Cancelled),
            read = tokio::time::timeout(START_TIMEOUT, read_frame_async(&mut self.stdout)) => read,
        };
        let frame = match read {
            Err(_) => return Err(StartError::Timeout(START_TIMEOUT)),
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                let status = self.exit_status_soon().await;
                return Err(StartError::Died {
                    status: describe_exit(status),
                    stderr: self.stderr_snapshot(),
                });
            }
            Ok(Err(e)) => return Err(e.into()),
        };

        match serde_json::from_slice::<Response>(&frame) {
            Ok(Response::Ready { version }) => Ok(version),
            Ok(Response::Error { message }) => Err(StartError::Refused {
                message,
                hint: missing_library_hint(&self.stderr_snapshot()),
            }),
            Ok(other) => Err(StartError::Refused {
                message: format!("unexpected startup response: {:?}", other),
                hint: String::new(),
            }),
            Err(e) => Err(StartError::Refused {
                message: format!("unparseable startup response: {}", e),
                hint: String::new(),
            }),
        }
    }

    /// Run one conversion. `doc` carries the binary payload for buffer
    /// mode. The caller guarantees single-flight.
    pub async fn convert(
        &mut self,
        request: &Request,
        doc: Option<&[u8]>,
        timeout: Duration,
        cancel: &CancellationToken,
        shutdown: &CancellationToken,
    ) -> ConvertOutcome {
        self.clear_stderr();
        let expect_buffer = matches!(request, Request::ConvertBuffer { .. });
        let payload = match serde_json::to_vec(request) {
            Ok(payload) => payload,
            Err(e) => return ConvertOutcome::Desynced(format!("request encoding failed: {}", e)),
        };
        let deadline = Instant::now() + timeout;

        let outcome = {
            let work = self.run_conversion(payload, doc, expect_buffer, deadline);
            tokio::pin!(work);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                _ = shutdown.cancelled() => None,
                outcome = &mut work => Some(outcome),
            }
        };

        match outcome {
            Some(outcome) => outcome,
            None => {
                // The worker may be mid-conversion; its state is
                // unrecoverable, so it has to go.
                self.kill().await;
                self.initialized = false;
                ConvertOutcome::Cancelled
            }
        }
    }

    async fn run_conversion(
        &mut self,
        payload: Vec<u8>,
        doc: Option<&[u8]>,
        expect_buffer: bool,
        deadline: Instant,
    ) -> ConvertOutcome {
        match tokio::time::timeout_at(deadline, write_frame_async(&mut self.stdin, &payload)).await
        {
            Err(_) => return self.timed_out().await,
            Ok(Err(_)) => return self.crashed().await,
            Ok(Ok(())) => {}
        }
        if let Some(doc) = doc {
            match tokio::time::timeout_at(deadline, write_frame_async(&mut self.stdin, doc)).await {
                Err(_) => return self.timed_out().await,
                Ok(Err(_)) => return self.crashed().await,
                Ok(Ok(())) => {}
            }
        }

        let frame = match tokio::time::timeout_at(deadline, read_frame_async(&mut self.stdout))
            .await
        {
            Err(_) => return self.timed_out().await,
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => return self.crashed().await,
            Ok(Err(e)) => return self.desynced(e.to_string()).await,
        };

        let response: Response = match serde_json::from_slice(&frame) {
            Ok(response) => response,
            Err(e) => return self.desynced(format!("unparseable response: {}", e)).await,
        };

        match (expect_buffer, response) {
            (
                false,
                Response::Result {
                    success,
                    error_code,
                    error_message,
                    diagnostics,
                    ..
                },
            ) => {
                self.conversions += 1;
                ConvertOutcome::Completed(ConversionResult {
                    success,
                    error_code: error_code.map(ErrorCode::from_code),
                    error_message,
                    diagnostics,
                    data: None,
                })
            }
            (
                true,
                Response::BufferResult {
                    success,
                    data_size,
                    error_code,
                    error_message,
                    diagnostics,
                    ..
                },
            ) => {
                let data = if success {
                    match tokio::time::timeout_at(deadline, read_frame_async(&mut self.stdout))
                        .await
                    {
                        Err(_) => return self.timed_out().await,
                        // Crash while the PDF was being streamed back.
                        Ok(Ok(None)) => return self.crashed().await,
                        Ok(Err(e)) => return self.desynced(e.to_string()).await,
                        Ok(Ok(Some(pdf))) => {
                            if let Some(declared) = data_size {
                                if declared != pdf.len() as u64 {
                                    warn!(
                                        "buffer_result declared {} bytes but framed {}",
                                        declared,
                                        pdf.len()
                                    );
                                }
                            }
                            Some(pdf)
                        }
                    }
                } else {
                    None
                };
                self.conversions += 1;
                ConvertOutcome::Completed(ConversionResult {
                    success,
                    error_code: error_code.map(ErrorCode::from_code),
                    error_message,
                    diagnostics,
                    data,
                })
            }
            (_, Response::Error { message }) => {
                // The worker rejected the request outright; the stream is
                // still in sync and the child stays up.
                ConvertOutcome::Completed(ConversionResult::failure(ErrorCode::Unknown, message))
            }
            (_, other) => {
                self.desynced(format!("mismatched response type: {:?}", other))
                    .await
            }
        }
    }

    async fn timed_out(&mut self) -> ConvertOutcome {
        self.kill().await;
        self.initialized = false;
        ConvertOutcome::TimedOut
    }

    async fn crashed(&mut self) -> ConvertOutcome {
        self.initialized = false;
        let exit = self.exit_status_soon().await.and_then(|s| s.code());
        let tail = self.stderr_snapshot();
        if !tail.is_empty() {
            warn!("worker stderr before crash:\n{}", tail.trim_end());
        }
        ConvertOutcome::Crashed { exit }
    }

    async fn desynced(&mut self, detail: String) -> ConvertOutcome {
        self.kill().await;
        self.initialized = false;
        ConvertOutcome::Desynced(detail)
    }

    /// Graceful-then-forceful teardown. Idempotent, tolerates everything.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.initialized = false;

        if matches!(self.child.try_wait(), Ok(None)) {
            if let Ok(payload) = serde_json::to_vec(&Request::Quit) {
                let _ = tokio::time::timeout(
                    Duration::from_secs(1),
                    write_frame_async(&mut self.stdin, &payload),
                )
                .await;
            }
            match tokio::time::timeout(QUIT_GRACE, self.child.wait()).await {
                Ok(status) => debug!("worker exited after quit: {:?}", status),
                Err(_) => {
                    warn!("worker ignored quit; killing");
                    self.kill().await;
                }
            }
        }
        self.gobbler.abort();
    }

    pub fn is_alive(&mut self) -> bool {
        !self.disposed && matches!(self.child.try_wait(), Ok(None))
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn conversions(&self) -> u64 {
        self.conversions
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Engine scratch directory, for diagnostics.
    pub fn profile_dir(&self) -> &Path {
        self.profile_dir.path()
    }

    async fn kill(&mut self) {
        // Whole process tree where the platform supports it.
        #[cfg(unix)]
        if let Some(pid) = self.child.id() {
            unsafe {
                libc::kill(-(pid as i32), libc::SIGKILL);
            }
        }
        if let Err(e) = self.child.start_kill() {
            debug!("kill: {}", e);
        }
        let _ = tokio::time::timeout(REAP_TIMEOUT, self.child.wait()).await;
    }

    async fn exit_status_soon(&mut self) -> Option<std::process::ExitStatus> {
        tokio::time::timeout(REAP_TIMEOUT, self.child.wait())
            .await
            .ok()
            .and_then(|r| r.ok())
    }

    fn stderr_snapshot(&self) -> String {
        self.stderr_tail
            .lock()
            .map(|tail| tail.clone())
            .unwrap_or_default()
    }

    fn clear_stderr(&self) {
        if let Ok(mut tail) = self.stderr_tail.lock() {
            tail.clear();
        }
    }
}

/// Environment discipline for the child (spawn-time only).
fn apply_environment(cmd: &mut Command, config: &PoolConfig, profile: &Path) {
    // Library lookup must see the worker's own directory and the engine's
    // program directory ahead of whatever is already set.
    let mut lib_dirs = Vec::new();
    if let Some(dir) = config.worker_path.parent() {
        lib_dirs.push(dir.to_path_buf());
    }
    lib_dirs.push(config.resource_path.clone());
    if let Some(existing) = std::env::var_os(LIB_PATH_VAR) {
        lib_dirs.extend(std::env::split_paths(&existing));
    }
    if let Ok(joined) = std::env::join_paths(lib_dirs) {
        cmd.env(LIB_PATH_VAR, joined);
    }

    // Headless rendering where the engine has such a backend; macOS only
    // ships the windowed one and wants polling on the calling thread.
    #[cfg(not(target_os = "macos"))]
    cmd.env("SAL_USE_VCLPLUGIN", "svp");
    #[cfg(target_os = "macos")]
    cmd.env("SAL_VCL_OSX_POLL_ON_CALLING_THREAD", "1");

    // Font warnings must reach stderr for the diagnostics capture.
    cmd.env("SAL_LOG", "+WARN");

    if !config.font_dirs.is_empty() {
        if let Ok(joined) = std::env::join_paths(&config.font_dirs) {
            cmd.env("SAL_FONTPATH", joined);
        }
    }

    // Engine scratch state is isolated per child.
    cmd.env(HOME_VAR, profile);

    for (key, value) in &config.extra_env {
        cmd.env(key, value);
    }
}

async fn gobble_stderr(stderr: ChildStderr, tail: Arc<Mutex<String>>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Ok(mut tail) = tail.lock() {
            if tail.len() < STDERR_TAIL_CAP {
                tail.push_str(&line);
                tail.push('\n');
            }
        }
    }
}

fn describe_exit(status: Option<std::process::ExitStatus>) -> String {
    match status {
        Some(status) => match status.code() {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        },
        None => "exit status unavailable".to_string(),
    }
}

fn missing_library_hint(stderr: &str) -> String {
    if MISSING_LIB_PHRASES.iter().any(|p| stderr.contains(p)) {
        "\nhint: the engine's native dependencies look incomplete; on Debian/Ubuntu \
         install libxml2, libxslt1.1, fontconfig, libfreetype6, libcups2 and libdbus-1-3"
            .to_string()
    } else {
        String::new()
    }
}
