//! Start-up discovery of the worker binary and the engine resources.
//!
//! Both searches walk a short list of conventional locations first and
//! consult the environment variables afterwards, so an explicit install
//! always wins over ambient configuration.

use std::ffi::OsString;
use std::path::PathBuf;

pub const WORKER_PATH_ENV: &str = "SLIMLO_WORKER_PATH";
pub const RESOURCE_PATH_ENV: &str = "SLIMLO_RESOURCE_PATH";

#[cfg(windows)]
const WORKER_BIN: &str = "slimlo_worker.exe";
#[cfg(not(windows))]
const WORKER_BIN: &str = "slimlo_worker";

#[cfg(target_os = "linux")]
const RESOURCE_CANDIDATES: &[&str] = &[
    "/usr/lib/libreoffice/program",
    "/usr/lib64/libreoffice/program",
    "/opt/libreoffice/program",
    "/snap/libreoffice/current/lib/libreoffice/program",
];
#[cfg(target_os = "macos")]
const RESOURCE_CANDIDATES: &[&str] = &["/Applications/LibreOffice.app/Contents/Frameworks"];
#[cfg(windows)]
const RESOURCE_CANDIDATES: &[&str] = &[
    r"C:\Program Files\LibreOffice\program",
    r"C:\Program Files (x86)\LibreOffice\program",
];
#[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
const RESOURCE_CANDIDATES: &[&str] = &["/usr/lib/libreoffice/program"];

/// Locate the worker executable: next to the current binary, then the
/// `SLIMLO_WORKER_PATH` variable, then `$PATH`.
pub fn find_worker_binary() -> Option<PathBuf> {
    first_existing_file(sibling_candidates())
        .or_else(|| env_path(std::env::var_os(WORKER_PATH_ENV)).filter(|p| p.is_file()))
        .or_else(|| which::which(WORKER_BIN).ok())
}

/// Locate the engine program directory: conventional install locations,
/// then the `SLIMLO_RESOURCE_PATH` variable.
pub fn find_resource_dir() -> Option<PathBuf> {
    first_existing_dir(RESOURCE_CANDIDATES.iter().map(PathBuf::from))
        .or_else(|| env_path(std::env::var_os(RESOURCE_PATH_ENV)).filter(|p| p.is_dir()))
}

fn sibling_candidates() -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            out.push(dir.join(WORKER_BIN));
        }
    }
    out
}

fn env_path(value: Option<OsString>) -> Option<PathBuf> {
    value.filter(|v| !v.is_empty()).map(PathBuf::from)
}

fn first_existing_file(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.is_file())
}

fn first_existing_dir(candidates: impl IntoIterator<Item = PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.is_dir())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_existing_dir_respects_order() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        let candidates = vec![
            PathBuf::from("/nonexistent-one"),
            a.path().to_path_buf(),
            b.path().to_path_buf(),
        ];
        assert_eq!(first_existing_dir(candidates), Some(a.path().to_path_buf()));
    }

    #[test]
    fn test_first_existing_file_skips_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("worker");
        std::fs::write(&file, "x").unwrap();
        let candidates = vec![tmp.path().to_path_buf(), file.clone()];
        assert_eq!(first_existing_file(candidates), Some(file));
    }

    #[test]
    fn test_env_path_ignores_empty() {
        assert_eq!(env_path(Some(OsString::new())), None);
        assert_eq!(
            env_path(Some(OsString::from("/somewhere"))),
            Some(PathBuf::from("/somewhere"))
        );
        assert_eq!(env_path(None), None);
    }
}
