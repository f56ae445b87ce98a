//! In-child capture of engine stderr around one conversion.
//!
//! The engine reports font substitutions and layout complaints as free-form
//! text on fd 2. Capturing inside the child ties that text to the exact
//! conversion that produced it, so the parsed diagnostics can travel back
//! in the response frame instead of racing a host-side reader.
//!
//! The capture is the classic dup-to-pipe dance: duplicate fd 2, point it
//! at a pipe, run the engine, restore fd 2, drain the pipe. The drain is
//! capped; anything past the cap is dropped and marked.

/// Upper bound on captured stderr per conversion.
pub const MAX_CAPTURE: usize = 256 * 1024;

const TRUNCATION_MARKER: &str = "\n[stderr truncated]";

#[cfg(unix)]
pub use imp::StderrCapture;

#[cfg(unix)]
mod imp {
    use super::{MAX_CAPTURE, TRUNCATION_MARKER};
    use std::io;
    use std::os::unix::io::RawFd;
    use std::sync::{Mutex, MutexGuard};

    // fd 2 is process-global state; at most one capture may be live.
    static REDIRECT_LOCK: Mutex<()> = Mutex::new(());

    /// An active fd-2 redirect. `finish` restores stderr and returns what
    /// the engine wrote while the capture was live.
    pub struct StderrCapture {
        saved: RawFd,
        read_end: RawFd,
        _guard: MutexGuard<'static, ()>,
    }

    impl StderrCapture {
        pub fn start() -> io::Result<Self> {
            let guard = REDIRECT_LOCK.lock().unwrap_or_else(|e| e.into_inner());
            unsafe {
                let mut fds = [0i32; 2];
                if libc::pipe(fds.as_mut_ptr()) != 0 {
                    return Err(io::Error::last_os_error());
                }
                let (read_end, write_end) = (fds[0], fds[1]);

                // The drain must never block once the writer is gone.
                let flags = libc::fcntl(read_end, libc::F_GETFL);
                libc::fcntl(read_end, libc::F_SETFL, flags | libc::O_NONBLOCK);

                // Default pipe capacity can be as small as 64 KiB; a chatty
                // engine would block on write. Grow it to the capture cap.
                #[cfg(target_os = "linux")]
                libc::fcntl(write_end, libc::F_SETPIPE_SZ, MAX_CAPTURE as libc::c_int);

                let saved = libc::dup(2);
                if saved < 0 {
                    let err = io::Error::last_os_error();
                    libc::close(read_end);
                    libc::close(write_end);
                    return Err(err);
                }
                if libc::dup2(write_end, 2) < 0 {
                    let err = io::Error::last_os_error();
                    libc::close(saved);
                    libc::close(read_end);
                    libc::close(write_end);
                    return Err(err);
                }
                libc::close(write_end);

                Ok(Self {
                    saved,
                    read_end,
                    _guard: guard,
                })
            }
        }

        pub fn finish(self) -> String {
            unsafe {
                // Restore fd 2 first: that closes the pipe's last write end,
                // so the drain below terminates at EOF.
                libc::dup2(self.saved, 2);
                libc::close(self.saved);

                let mut captured = Vec::new();
                let mut truncated = false;
                let mut chunk = [0u8; 4096];
                loop {
                    let n = libc::read(
                        self.read_end,
                        chunk.as_mut_ptr() as *mut libc::c_void,
                        chunk.len(),
                    );
                    if n <= 0 {
                        // 0 = EOF; negative = EAGAIN or a real error. Either
                        // way there is nothing more worth waiting for.
                        break;
                    }
                    let n = n as usize;
                    if captured.len() < MAX_CAPTURE {
                        let take = n.min(MAX_CAPTURE - captured.len());
                        captured.extend_from_slice(&chunk[..take]);
                        if take < n {
                            truncated = true;
                        }
                    } else {
                        truncated = true;
                    }
                }
                libc::close(self.read_end);

                let mut text = String::from_utf8_lossy(&captured).into_owned();
                if truncated {
                    text.push_str(TRUNCATION_MARKER);
                }
                text
            }
        }
    }
}

#[cfg(not(unix))]
pub use imp::StderrCapture;

#[cfg(not(unix))]
mod imp {
    use std::io;

    /// No fd redirection on this platform; conversions report no
    /// diagnostics.
    pub struct StderrCapture;

    impl StderrCapture {
        pub fn start() -> io::Result<Self> {
            Ok(StderrCapture)
        }

        pub fn finish(self) -> String {
            String::new()
        }
    }
}
