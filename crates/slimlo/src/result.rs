//! Host-facing conversion outcome.

use slimlo_protocol::{Diagnostic, ErrorCode};

/// What one conversion produced. Failures are values, not errors: callers
/// branch on `success` and read the code/message pair.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub success: bool,
    pub error_code: Option<ErrorCode>,
    pub error_message: Option<String>,
    /// Engine diagnostics for this conversion; present even on success.
    pub diagnostics: Vec<Diagnostic>,
    /// PDF bytes, buffer-mode only.
    pub data: Option<Vec<u8>>,
}

impl ConversionResult {
    pub(crate) fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(code),
            error_message: Some(message.into()),
            diagnostics: Vec::new(),
            data: None,
        }
    }
}
