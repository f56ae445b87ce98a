//! Control-frame schemas (JSON payload types).
//!
//! All keys are lowercase snake_case; absent optional keys are omitted on
//! the wire rather than serialized as `null`. Required fields are modeled
//! as `Option` on the *read* side so the worker can answer a malformed
//! request with a structured `INVALID_ARGUMENT` result instead of tearing
//! the conversation down.

use serde::{Deserialize, Serialize};

/// Host -> Worker request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Bring up the engine. Sent exactly once per child, first.
    Init {
        resource_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_paths: Option<Vec<String>>,
    },
    /// File-path conversion: no payload bytes transit the pipe.
    Convert {
        #[serde(default)]
        id: u64,
        input: Option<String>,
        output: Option<String>,
        #[serde(default)]
        format: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<PdfOptions>,
    },
    /// In-memory conversion: followed immediately by one binary frame of
    /// exactly `data_size` document bytes.
    ConvertBuffer {
        #[serde(default)]
        id: u64,
        #[serde(default)]
        format: u32,
        #[serde(default)]
        data_size: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        options: Option<PdfOptions>,
    },
    /// Graceful shutdown request.
    Quit,
}

/// Worker -> Host response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Engine is up; `version` is the engine-reported build string.
    Ready { version: String },
    /// Outcome of a `convert` request.
    Result {
        id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(default)]
        diagnostics: Vec<Diagnostic>,
    },
    /// Outcome of a `convert_buffer` request. When `success` is true, one
    /// binary frame of exactly `data_size` PDF bytes follows.
    BufferResult {
        id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data_size: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(default)]
        diagnostics: Vec<Diagnostic>,
    },
    /// Protocol-level failure (bad frame, init failure, ...).
    Error { message: String },
}

impl Response {
    /// Failed `convert` outcome.
    pub fn result_err(
        id: u64,
        code: ErrorCode,
        message: impl Into<String>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Response::Result {
            id,
            success: false,
            error_code: Some(code.code()),
            error_message: Some(message.into()),
            diagnostics,
        }
    }

    /// Failed `convert_buffer` outcome.
    pub fn buffer_result_err(
        id: u64,
        code: ErrorCode,
        message: impl Into<String>,
        diagnostics: Vec<Diagnostic>,
    ) -> Self {
        Response::BufferResult {
            id,
            success: false,
            data_size: None,
            error_code: Some(code.code()),
            error_message: Some(message.into()),
            diagnostics,
        }
    }
}

/// Input document format code. Only DOCX is accepted; the other codes are
/// reserved and rejected with `INVALID_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum DocFormat {
    Unknown = 0,
    Docx = 1,
    Xlsx = 2,
    Pptx = 3,
}

impl DocFormat {
    /// Decode a wire format code; unrecognized codes collapse to `Unknown`.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => DocFormat::Docx,
            2 => DocFormat::Xlsx,
            3 => DocFormat::Pptx,
            _ => DocFormat::Unknown,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }

    /// Scratch-file extension used for buffer-mode inputs.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            DocFormat::Docx => Some("docx"),
            DocFormat::Xlsx => Some("xlsx"),
            DocFormat::Pptx => Some("pptx"),
            DocFormat::Unknown => None,
        }
    }
}

/// Numeric error taxonomy shared on the wire and in result objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    InitFailed = 1,
    LoadFailed = 2,
    ExportFailed = 3,
    InvalidFormat = 4,
    InputNotFound = 5,
    OutOfMemory = 6,
    PermissionDenied = 7,
    AlreadyInitialized = 8,
    NotInitialized = 9,
    InvalidArgument = 10,
    Unknown = 99,
}

impl ErrorCode {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => ErrorCode::Ok,
            1 => ErrorCode::InitFailed,
            2 => ErrorCode::LoadFailed,
            3 => ErrorCode::ExportFailed,
            4 => ErrorCode::InvalidFormat,
            5 => ErrorCode::InputNotFound,
            6 => ErrorCode::OutOfMemory,
            7 => ErrorCode::PermissionDenied,
            8 => ErrorCode::AlreadyInitialized,
            9 => ErrorCode::NotInitialized,
            10 => ErrorCode::InvalidArgument,
            _ => ErrorCode::Unknown,
        }
    }

    pub fn code(self) -> u32 {
        self as u32
    }
}

/// PDF export options. Zero means "engine default" for the numeric knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfOptions {
    /// 0 = default, 1 = PDF/A-1, 2 = PDF/A-2, 3 = PDF/A-3.
    #[serde(default)]
    pub pdf_version: u32,
    /// 1..=100; 0 = engine default.
    #[serde(default)]
    pub jpeg_quality: u32,
    /// Raster resolution; 0 = engine default.
    #[serde(default)]
    pub dpi: u32,
    #[serde(default)]
    pub tagged_pdf: bool,
    /// Engine-defined page-range grammar, e.g. "1-3,5".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_range: Option<String>,
    /// Password for opening protected input documents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagSeverity {
    Info,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagCategory {
    General,
    Font,
    Layout,
}

/// Structured record extracted from engine stderr during one conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagSeverity,
    pub category: DiagCategory,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substituted_with: Option<String>,
}
