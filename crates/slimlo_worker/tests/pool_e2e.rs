//! End-to-end pool scenarios against real worker children.
//!
//! The stub engine stands in for LibreOffice: it stamps its pid into the
//! "PDF" output (making child identity observable for the recycle and
//! crash tests) and honors `sleep:`/`crash` directives embedded in the
//! input document.

use std::path::PathBuf;
use std::time::Duration;

use slimlo::{
    BufferRequest, CancellationToken, ConvertRequest, DocFormat, ErrorCode, Pool, PoolConfig,
    PoolError,
};

fn test_config(tmp: &tempfile::TempDir) -> PoolConfig {
    let resources = tmp.path().join("program");
    std::fs::create_dir_all(&resources).unwrap();
    let mut config = PoolConfig::new(
        PathBuf::from(env!("CARGO_BIN_EXE_slimlo_worker")),
        resources,
    );
    config.extra_env = vec![("SLIMLO_ENGINE".to_string(), "stub".to_string())];
    config
}

fn write_doc(tmp: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

/// The stub engine stamps `pid=<n>` into its output.
fn stub_pid(pdf: &[u8]) -> u32 {
    let text = String::from_utf8_lossy(pdf);
    let at = text.find("pid=").expect("stub output carries a pid");
    text[at + 4..]
        .split_whitespace()
        .next()
        .unwrap()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn test_happy_file_conversion() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();
    let input = write_doc(&tmp, "a.docx", "hello world");
    let output = tmp.path().join("a.pdf");

    let result = pool
        .execute(
            ConvertRequest::new(&input, &output),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(result.success, "failure: {:?}", result.error_message);
    assert!(result.diagnostics.is_empty());
    assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF"));
    pool.dispose().await;
}

#[tokio::test]
async fn test_format_rejection_without_ipc() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();
    let input = write_doc(&tmp, "sheet.xlsx", "cells");
    let output = tmp.path().join("sheet.pdf");

    let mut request = ConvertRequest::new(&input, &output);
    request.format = DocFormat::Xlsx;
    let result = pool
        .execute(request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::InvalidFormat));
    assert!(!output.exists(), "no output may be written");
    pool.dispose().await;
}

#[tokio::test]
async fn test_missing_input_without_ipc() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();

    let result = pool
        .execute(
            ConvertRequest::new(tmp.path().join("absent.docx"), tmp.path().join("out.pdf")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::InputNotFound));
    pool.dispose().await;
}

#[tokio::test]
async fn test_buffer_roundtrip() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();

    let doc = b"buffer document body".to_vec();
    let result = pool
        .execute_buffer(BufferRequest::default(), &doc, &CancellationToken::new())
        .await
        .unwrap();

    assert!(result.success, "failure: {:?}", result.error_message);
    let pdf = result.data.expect("buffer mode returns bytes");
    assert!(pdf.starts_with(b"%PDF"));
    pool.dispose().await;
}

#[tokio::test]
async fn test_empty_buffer_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();

    let result = pool
        .execute_buffer(BufferRequest::default(), &[], &CancellationToken::new())
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::InvalidArgument));
    pool.dispose().await;
}

#[tokio::test]
async fn test_crash_then_recover() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();

    // The stub aborts the whole process mid-conversion.
    let bad = write_doc(&tmp, "bad.docx", "crash");
    let result = pool
        .execute(
            ConvertRequest::new(&bad, tmp.path().join("bad.pdf")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(!result.success);
    assert!(
        result.error_message.as_deref().unwrap().contains("crashed"),
        "message: {:?}",
        result.error_message
    );

    // The very next conversion on the same pool runs on a fresh child.
    let good = write_doc(&tmp, "good.docx", "hello");
    let output = tmp.path().join("good.pdf");
    let result = pool
        .execute(
            ConvertRequest::new(&good, &output),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(result.success, "failure: {:?}", result.error_message);
    assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF"));
    pool.dispose().await;
}

#[tokio::test]
async fn test_timeout_kills_and_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(&tmp);
    config.timeout = Duration::from_millis(500);
    let pool = Pool::new(config).unwrap();

    let slow = write_doc(&tmp, "slow.docx", "sleep:10000");
    let result = pool
        .execute(
            ConvertRequest::new(&slow, tmp.path().join("slow.pdf")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(!result.success);
    assert!(
        result.error_message.as_deref().unwrap().contains("timed out"),
        "message: {:?}",
        result.error_message
    );

    let good = write_doc(&tmp, "good.docx", "hello");
    let output = tmp.path().join("good.pdf");
    let result = pool
        .execute(
            ConvertRequest::new(&good, &output),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(result.success, "failure: {:?}", result.error_message);
    pool.dispose().await;
}

#[tokio::test]
async fn test_recycle_spawns_fresh_child() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(&tmp);
    config.recycle_after = 2;
    let pool = Pool::new(config).unwrap();
    let cancel = CancellationToken::new();

    let mut pids = Vec::new();
    for _ in 0..3 {
        let result = pool
            .execute_buffer(BufferRequest::default(), b"doc", &cancel)
            .await
            .unwrap();
        assert!(result.success);
        pids.push(stub_pid(result.data.as_deref().unwrap()));
    }

    assert_eq!(pids[0], pids[1], "first two conversions share a child");
    assert_ne!(
        pids[1], pids[2],
        "the recycle threshold must force a fresh child"
    );
    pool.dispose().await;
}

#[tokio::test]
async fn test_concurrent_dispatch_spreads_over_n_workers() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(&tmp);
    config.workers = 2;
    let pool = Pool::new(config).unwrap();
    let cancel = CancellationToken::new();

    let doc = b"sleep:300".to_vec();
    let run = |_i: usize| pool.execute_buffer(BufferRequest::default(), &doc, &cancel);
    let (a, b, c, d) = tokio::join!(run(0), run(1), run(2), run(3));

    let mut pids = Vec::new();
    for result in [a, b, c, d] {
        let result = result.unwrap();
        assert!(result.success, "failure: {:?}", result.error_message);
        pids.push(stub_pid(result.data.as_deref().unwrap()));
    }
    pids.sort_unstable();
    pids.dedup();
    assert!(
        pids.len() <= 2,
        "at most N distinct children may serve the burst, saw {:?}",
        pids
    );
    pool.dispose().await;
}

#[tokio::test]
async fn test_cancellation_kills_worker_and_recovers() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();

    let slow = write_doc(&tmp, "slow.docx", "sleep:10000");
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });
    }

    let err = pool
        .execute(
            ConvertRequest::new(&slow, tmp.path().join("slow.pdf")),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Cancelled));

    // The slot restarts transparently afterwards.
    let good = write_doc(&tmp, "good.docx", "hello");
    let result = pool
        .execute(
            ConvertRequest::new(&good, tmp.path().join("good.pdf")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();
    assert!(result.success);
    pool.dispose().await;
}

#[tokio::test]
async fn test_warm_up_caches_engine_version() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();

    assert!(pool.engine_version().is_none());
    pool.warm_up(&CancellationToken::new()).await.unwrap();
    let version = pool.engine_version().expect("version cached on start");
    assert!(version.contains("slimlo-stub"));
    pool.dispose().await;
}

#[tokio::test]
async fn test_dispose_refuses_further_work() {
    let tmp = tempfile::tempdir().unwrap();
    let pool = Pool::new(test_config(&tmp)).unwrap();
    let cancel = CancellationToken::new();

    // Learn the child's pid, then dispose.
    let result = pool
        .execute_buffer(BufferRequest::default(), b"doc", &cancel)
        .await
        .unwrap();
    let pid = stub_pid(result.data.as_deref().unwrap());
    pool.dispose().await;

    // Dispose is idempotent and the pool stays closed.
    pool.dispose().await;
    let err = pool
        .execute_buffer(BufferRequest::default(), b"doc", &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, PoolError::Disposed));

    #[cfg(target_os = "linux")]
    {
        // The child was reaped during dispose; its /proc entry is gone.
        assert!(
            !std::path::Path::new(&format!("/proc/{}", pid)).exists(),
            "worker {} must not outlive dispose",
            pid
        );
    }
    #[cfg(not(target_os = "linux"))]
    let _ = pid;
}

#[tokio::test]
async fn test_start_failure_is_a_result_not_a_panic() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(&tmp);
    // Force engine init failure: the real LOK loader cannot find the
    // engine library in an empty resource dir.
    config.extra_env = vec![("SLIMLO_ENGINE".to_string(), "lok".to_string())];
    let pool = Pool::new(config).unwrap();

    let input = write_doc(&tmp, "a.docx", "hello");
    let result = pool
        .execute(
            ConvertRequest::new(&input, tmp.path().join("a.pdf")),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.error_code, Some(ErrorCode::InitFailed));
    pool.dispose().await;
}
