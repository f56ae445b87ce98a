//! Conversion paths shared by the `convert` and `convert_buffer` handlers.
//!
//! The engine speaks `file:` URLs and a JSON option syntax; this module
//! owns that translation plus the buffer-mode scratch files. Failures come
//! back as `(ErrorCode, message)` pairs ready to drop into a result frame.

use std::io::Write;
use std::path::{Path, PathBuf};

use slimlo_protocol::{DocFormat, ErrorCode, PdfOptions};
use tracing::debug;
use url::Url;

use crate::engine::{Engine, EngineError};

/// LibreOffice export filter for PDF output.
const PDF_FILTER: &str = "pdf";

pub type ConvertError = (ErrorCode, String);

/// File-path conversion: load `input`, export to `output`.
pub fn convert_file(
    engine: &mut dyn Engine,
    input: &str,
    output: &str,
    format: u32,
    options: Option<&PdfOptions>,
) -> Result<(), ConvertError> {
    check_format(format)?;
    if input.is_empty() || output.is_empty() {
        return Err((
            ErrorCode::InvalidArgument,
            "input and output paths must be non-empty".to_string(),
        ));
    }

    let input_url = path_to_url(Path::new(input)).ok_or_else(|| {
        (
            ErrorCode::InvalidArgument,
            format!("input path must be absolute: {}", input),
        )
    })?;
    let output_url = path_to_url(Path::new(output)).ok_or_else(|| {
        (
            ErrorCode::InvalidArgument,
            format!("output path must be absolute: {}", output),
        )
    })?;

    let load_options = build_load_options(options);
    let mut doc = engine
        .load_document(&input_url, load_options.as_deref())
        .map_err(map_engine_error)?;

    let filter_options = build_filter_options(options);
    doc.save_as(&output_url, PDF_FILTER, filter_options.as_deref())
        .map_err(map_engine_error)?;

    debug!("converted {} -> {}", input, output);
    Ok(())
}

/// Buffer conversion: persist `data` to a scratch file, convert it, read
/// the PDF back. Both scratch files are deleted on every exit path (they
/// are owned by `tempfile` guards).
pub fn convert_buffer(
    engine: &mut dyn Engine,
    data: &[u8],
    format: u32,
    options: Option<&PdfOptions>,
) -> Result<Vec<u8>, ConvertError> {
    check_format(format)?;
    let ext = DocFormat::from_code(format)
        .extension()
        .expect("accepted formats have an extension");

    let mut input = tempfile::Builder::new()
        .prefix("slimlo-doc-")
        .suffix(&format!(".{}", ext))
        .tempfile()
        .map_err(map_io_error)?;
    input.write_all(data).map_err(map_io_error)?;
    input.flush().map_err(map_io_error)?;

    let output = tempfile::Builder::new()
        .prefix("slimlo-pdf-")
        .suffix(".pdf")
        .tempfile()
        .map_err(map_io_error)?
        .into_temp_path();

    convert_file(
        engine,
        &input.path().to_string_lossy(),
        &output.to_string_lossy(),
        format,
        options,
    )?;

    std::fs::read(&output).map_err(map_io_error)
}

fn check_format(format: u32) -> Result<(), ConvertError> {
    match DocFormat::from_code(format) {
        DocFormat::Docx => Ok(()),
        other => Err((
            ErrorCode::InvalidFormat,
            format!("unsupported input format: {:?} (code {})", other, format),
        )),
    }
}

fn map_engine_error(err: EngineError) -> ConvertError {
    match err {
        EngineError::Init(msg) => (ErrorCode::InitFailed, msg),
        EngineError::Load(msg) => (ErrorCode::LoadFailed, msg),
        EngineError::Export(msg) => (ErrorCode::ExportFailed, msg),
    }
}

fn map_io_error(err: std::io::Error) -> ConvertError {
    let code = match err.kind() {
        std::io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
        std::io::ErrorKind::OutOfMemory => ErrorCode::OutOfMemory,
        _ => ErrorCode::Unknown,
    };
    (code, err.to_string())
}

/// Convert an absolute path to the engine's `file:` URL form.
pub fn path_to_url(path: &Path) -> Option<String> {
    Url::from_file_path(path).ok().map(Into::into)
}

/// Convert a `file:` URL back to a path.
pub fn url_to_path(url: &str) -> Option<PathBuf> {
    Url::parse(url).ok()?.to_file_path().ok()
}

/// Build the engine's JSON load options. Currently just the password for
/// protected input documents.
fn build_load_options(options: Option<&PdfOptions>) -> Option<String> {
    let password = options?.password.as_ref()?;
    Some(
        serde_json::json!({
            "Password": { "type": "string", "value": password },
        })
        .to_string(),
    )
}

/// Build the engine's JSON filter options for PDF export. Returns `None`
/// when everything is at its engine default.
fn build_filter_options(options: Option<&PdfOptions>) -> Option<String> {
    let opts = options?;
    let mut filter = serde_json::Map::new();

    if (1..=3).contains(&opts.pdf_version) {
        filter.insert(
            "SelectPdfVersion".to_string(),
            long_property(opts.pdf_version),
        );
    }
    if (1..=100).contains(&opts.jpeg_quality) {
        filter.insert("Quality".to_string(), long_property(opts.jpeg_quality));
    }
    if opts.dpi > 0 {
        filter.insert("MaxImageResolution".to_string(), long_property(opts.dpi));
    }
    if opts.tagged_pdf {
        filter.insert(
            "UseTaggedPDF".to_string(),
            serde_json::json!({ "type": "boolean", "value": "true" }),
        );
    }
    if let Some(range) = &opts.page_range {
        filter.insert(
            "PageRange".to_string(),
            serde_json::json!({ "type": "string", "value": range }),
        );
    }

    if filter.is_empty() {
        None
    } else {
        Some(serde_json::Value::Object(filter).to_string())
    }
}

fn long_property(value: u32) -> serde_json::Value {
    serde_json::json!({ "type": "long", "value": value.to_string() })
}
