//! One-shot DOCX -> PDF conversion front-end over the worker pool.
//!
//! Usage:
//!     slimlo report.docx
//!     slimlo report.docx out/report.pdf --workers 2 --pdf-version 2
//!     cat report.docx | slimlo - report.pdf

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use slimlo::{
    BufferRequest, CancellationToken, ConvertRequest, DocFormat, PdfOptions, Pool, PoolConfig,
};
use slimlo_logging::{init_logging, LogConfig};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "slimlo", about = "Convert DOCX documents to PDF")]
struct Args {
    /// Input document (DOCX), or "-" to read document bytes from stdin
    input: PathBuf,

    /// Output PDF path (defaults to the input with a .pdf extension;
    /// required with stdin input)
    output: Option<PathBuf>,

    /// Worker processes to run
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Per-conversion timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,

    /// Worker executable (auto-detected when omitted)
    #[arg(long, env = "SLIMLO_WORKER_PATH")]
    worker_path: Option<PathBuf>,

    /// Engine program directory (auto-detected when omitted)
    #[arg(long, env = "SLIMLO_RESOURCE_PATH")]
    resource_path: Option<PathBuf>,

    /// Additional font directory (repeatable)
    #[arg(long = "font-dir")]
    font_dirs: Vec<PathBuf>,

    /// 0 = default, 1..3 = PDF/A-1..PDF/A-3
    #[arg(long, default_value_t = 0)]
    pdf_version: u32,

    /// JPEG quality 1..100 (0 = engine default)
    #[arg(long, default_value_t = 0)]
    jpeg_quality: u32,

    /// Raster resolution (0 = engine default)
    #[arg(long, default_value_t = 0)]
    dpi: u32,

    /// Emit a tagged (accessible) PDF
    #[arg(long)]
    tagged_pdf: bool,

    /// Pages to export, e.g. "1-3,5"
    #[arg(long)]
    page_range: Option<String>,

    /// Password for protected input documents
    #[arg(long)]
    password: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(LogConfig {
        app_name: "slimlo",
        verbose: args.verbose,
        stderr: true,
    })?;

    let worker_path = args
        .worker_path
        .or_else(slimlo::paths::find_worker_binary)
        .context(
            "could not locate the slimlo_worker executable; pass --worker-path or set SLIMLO_WORKER_PATH",
        )?;
    let resource_path = args
        .resource_path
        .or_else(slimlo::paths::find_resource_dir)
        .context(
            "could not locate the engine resources; pass --resource-path or set SLIMLO_RESOURCE_PATH",
        )?;
    let from_stdin = args.input.as_os_str() == "-";
    let output = match (&args.output, from_stdin) {
        (Some(output), _) => output.clone(),
        (None, false) => args.input.with_extension("pdf"),
        (None, true) => bail!("an output path is required with stdin input"),
    };

    let mut config = PoolConfig::new(worker_path, resource_path);
    config.workers = args.workers;
    config.timeout = Duration::from_secs(args.timeout);
    config.font_dirs = args.font_dirs.clone();
    let pool = Pool::new(config)?;

    // Ctrl-C cancels the in-flight conversion and kills the worker.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted; cancelling");
                cancel.cancel();
            }
        });
    }

    let options = PdfOptions {
        pdf_version: args.pdf_version,
        jpeg_quality: args.jpeg_quality,
        dpi: args.dpi,
        tagged_pdf: args.tagged_pdf,
        page_range: args.page_range.clone(),
        password: args.password.clone(),
    };

    let result = if from_stdin {
        let mut doc = Vec::new();
        std::io::stdin()
            .read_to_end(&mut doc)
            .context("failed to read stdin")?;
        pool.execute_buffer(
            BufferRequest {
                format: DocFormat::Docx,
                options,
            },
            &doc,
            &cancel,
        )
        .await
    } else {
        pool.execute(
            ConvertRequest {
                input: args.input.clone(),
                output: output.clone(),
                format: DocFormat::Docx,
                options,
            },
            &cancel,
        )
        .await
    };
    pool.dispose().await;
    let result = result?;

    for diag in &result.diagnostics {
        match (&diag.font, &diag.substituted_with) {
            (Some(font), Some(substitute)) => {
                warn!("font \"{}\" substituted with \"{}\"", font, substitute)
            }
            (Some(font), None) => warn!("font \"{}\": {}", font, diag.message),
            _ => warn!("{}", diag.message),
        }
    }

    if !result.success {
        let code = result.error_code.map(|c| c.code()).unwrap_or(99);
        bail!(
            "conversion failed (code {}): {}",
            code,
            result.error_message.unwrap_or_else(|| "unknown error".into())
        );
    }

    // Buffer mode returns the PDF inline; persist it ourselves.
    if let Some(data) = &result.data {
        std::fs::write(&output, data)
            .with_context(|| format!("failed to write {}", output.display()))?;
    }

    if let Some(version) = pool.engine_version() {
        info!("engine: {}", version);
    }
    info!("wrote {}", output.display());
    Ok(())
}
