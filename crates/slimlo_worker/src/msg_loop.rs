//! The worker's read-dispatch-reply loop.
//!
//! Synchronous and single-threaded: one frame in, one engine call, one
//! frame out. The host guarantees a single in-flight request, so there is
//! no queueing here. Stdin closing (or a quit frame) ends the process.

use std::io::{Read, Write};

use slimlo_protocol::{read_frame, write_frame, ErrorCode, PdfOptions, Request, Response};
use tracing::{debug, error, info, warn};

use crate::convert;
use crate::diag;
use crate::engine::{Engine, EngineError};
use crate::stderr::StderrCapture;

/// Builds the engine on `init`. Receives the resource path and the
/// host-provided font directories.
pub type EngineFactory =
    Box<dyn FnMut(&str, &[String]) -> Result<Box<dyn Engine>, EngineError>>;

pub struct MsgLoop<R, W> {
    reader: R,
    writer: W,
    factory: EngineFactory,
    engine: Option<Box<dyn Engine>>,
}

impl<R: Read, W: Write> MsgLoop<R, W> {
    pub fn new(reader: R, writer: W, factory: EngineFactory) -> Self {
        Self {
            reader,
            writer,
            factory,
            engine: None,
        }
    }

    /// Run until quit or end-of-stream. Returns the process exit code.
    pub fn run(&mut self) -> i32 {
        loop {
            let frame = match read_frame(&mut self.reader) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("stdin closed; exiting");
                    break;
                }
                Err(e) => {
                    error!("unrecoverable read error: {}", e);
                    self.engine.take();
                    return 1;
                }
            };

            if frame.is_empty() {
                continue;
            }

            // Unparseable bytes get an error reply; valid JSON that is not
            // a known request is dropped.
            if serde_json::from_slice::<serde_json::Value>(&frame).is_err() {
                if self.reply(&Response::Error {
                    message: "Invalid JSON".to_string(),
                }) {
                    continue;
                }
                return 1;
            }
            let request: Request = match serde_json::from_slice(&frame) {
                Ok(request) => request,
                Err(e) => {
                    warn!("dropping unrecognized frame: {}", e);
                    continue;
                }
            };

            let done = match request {
                Request::Quit => {
                    info!("quit requested");
                    break;
                }
                Request::Init {
                    resource_path,
                    font_paths,
                } => !self.handle_init(resource_path, font_paths),
                Request::Convert {
                    id,
                    input,
                    output,
                    format,
                    options,
                } => !self.handle_convert(id, input, output, format, options),
                Request::ConvertBuffer {
                    id,
                    format,
                    data_size,
                    options,
                } => match self.handle_convert_buffer(id, format, data_size, options) {
                    BufferStep::Continue => false,
                    BufferStep::Eos => {
                        debug!("stdin closed mid-request; exiting");
                        break;
                    }
                    BufferStep::Fatal => true,
                },
            };

            if done {
                self.engine.take();
                return 1;
            }
        }

        // Engine teardown before the clean exit.
        self.engine.take();
        0
    }

    /// Write a response frame. False means the pipe is gone.
    fn reply(&mut self, response: &Response) -> bool {
        let payload = match serde_json::to_vec(response) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to encode response: {}", e);
                return false;
            }
        };
        if let Err(e) = write_frame(&mut self.writer, &payload) {
            error!("unrecoverable write error: {}", e);
            return false;
        }
        true
    }

    fn handle_init(
        &mut self,
        resource_path: Option<String>,
        font_paths: Option<Vec<String>>,
    ) -> bool {
        if self.engine.is_some() {
            return self.reply(&Response::Error {
                message: "engine already initialized".to_string(),
            });
        }
        let resource_path = match resource_path {
            Some(path) if !path.is_empty() => path,
            _ => {
                return self.reply(&Response::Error {
                    message: "init: missing resource_path".to_string(),
                })
            }
        };
        let font_paths = font_paths.unwrap_or_default();

        match (self.factory)(&resource_path, &font_paths) {
            Ok(engine) => {
                let version = engine.version();
                info!("engine initialized: {}", version);
                self.engine = Some(engine);
                self.reply(&Response::Ready { version })
            }
            Err(e) => {
                error!("engine init failed: {}", e);
                self.reply(&Response::Error {
                    message: e.to_string(),
                })
            }
        }
    }

    fn handle_convert(
        &mut self,
        id: u64,
        input: Option<String>,
        output: Option<String>,
        format: u32,
        options: Option<PdfOptions>,
    ) -> bool {
        if self.engine.is_none() {
            return self.reply(&Response::result_err(
                id,
                ErrorCode::NotInitialized,
                "worker not initialized",
                vec![],
            ));
        }
        let (input, output) = match (input, output) {
            (Some(input), Some(output)) => (input, output),
            _ => {
                return self.reply(&Response::result_err(
                    id,
                    ErrorCode::InvalidArgument,
                    "convert: missing input or output path",
                    vec![],
                ))
            }
        };

        let engine = self.engine.as_deref_mut().expect("checked above");
        let (outcome, diagnostics) = capture_diagnostics(|| {
            convert::convert_file(engine, &input, &output, format, options.as_ref())
        });

        let response = match outcome {
            Ok(()) => Response::Result {
                id,
                success: true,
                error_code: None,
                error_message: None,
                diagnostics,
            },
            Err((code, message)) => Response::result_err(id, code, message, diagnostics),
        };
        self.reply(&response)
    }

    fn handle_convert_buffer(
        &mut self,
        id: u64,
        format: u32,
        data_size: u64,
        options: Option<PdfOptions>,
    ) -> BufferStep {
        // The binary frame follows unconditionally; consume it before any
        // validation so the stream stays in sync.
        let data = match read_frame(&mut self.reader) {
            Ok(Some(data)) => data,
            Ok(None) => return BufferStep::Eos,
            Err(e) => {
                error!("unrecoverable read error: {}", e);
                return BufferStep::Fatal;
            }
        };

        if self.engine.is_none() {
            return self.finish_buffer(Response::buffer_result_err(
                id,
                ErrorCode::NotInitialized,
                "worker not initialized",
                vec![],
            ));
        }
        if data.len() as u64 != data_size {
            return self.finish_buffer(Response::buffer_result_err(
                id,
                ErrorCode::InvalidArgument,
                format!(
                    "data_size {} does not match payload length {}",
                    data_size,
                    data.len()
                ),
                vec![],
            ));
        }
        if data.is_empty() {
            return self.finish_buffer(Response::buffer_result_err(
                id,
                ErrorCode::InvalidArgument,
                "empty document buffer",
                vec![],
            ));
        }

        let engine = self.engine.as_deref_mut().expect("checked above");
        let (outcome, diagnostics) = capture_diagnostics(|| {
            convert::convert_buffer(engine, &data, format, options.as_ref())
        });

        match outcome {
            Ok(pdf) => {
                let response = Response::BufferResult {
                    id,
                    success: true,
                    data_size: Some(pdf.len() as u64),
                    error_code: None,
                    error_message: None,
                    diagnostics,
                };
                if !self.reply(&response) {
                    return BufferStep::Fatal;
                }
                if let Err(e) = write_frame(&mut self.writer, &pdf) {
                    error!("unrecoverable write error: {}", e);
                    return BufferStep::Fatal;
                }
                BufferStep::Continue
            }
            Err((code, message)) => {
                self.finish_buffer(Response::buffer_result_err(id, code, message, diagnostics))
            }
        }
    }

    fn finish_buffer(&mut self, response: Response) -> BufferStep {
        if self.reply(&response) {
            BufferStep::Continue
        } else {
            BufferStep::Fatal
        }
    }
}

enum BufferStep {
    Continue,
    Eos,
    Fatal,
}

/// Redirect fd 2 around an engine call and parse whatever it wrote.
fn capture_diagnostics<T>(
    work: impl FnOnce() -> T,
) -> (T, Vec<slimlo_protocol::Diagnostic>) {
    match StderrCapture::start() {
        Ok(capture) => {
            let outcome = work();
            let text = capture.finish();
            let diagnostics = diag::parse_diagnostics(&text);
            (outcome, diagnostics)
        }
        Err(e) => {
            // Conversion still runs; it just reports no diagnostics.
            warn!("stderr capture unavailable: {}", e);
            (work(), vec![])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::stub::StubEngine;
    use std::io::Cursor;

    fn stub_factory() -> EngineFactory {
        Box::new(
            |resource_path: &str, _fonts: &[String]| -> Result<Box<dyn Engine>, EngineError> {
                Ok(Box::new(StubEngine::init(resource_path)?))
            },
        )
    }

    /// Feed a scripted sequence of frames and collect the replies.
    fn run_session(frames: Vec<Vec<u8>>) -> (i32, Vec<Vec<u8>>) {
        let mut input = Vec::new();
        for frame in frames {
            write_frame(&mut input, &frame).unwrap();
        }
        let mut output = Vec::new();
        let code = MsgLoop::new(Cursor::new(input), &mut output, stub_factory()).run();

        let mut replies = Vec::new();
        let mut cursor = Cursor::new(output);
        while let Some(frame) = read_frame(&mut cursor).unwrap() {
            replies.push(frame);
        }
        (code, replies)
    }

    fn json(frame: &[u8]) -> serde_json::Value {
        serde_json::from_slice(frame).unwrap()
    }

    fn init_frame() -> Vec<u8> {
        serde_json::to_vec(&Request::Init {
            resource_path: Some("/nonexistent".into()),
            font_paths: None,
        })
        .unwrap()
    }

    #[test]
    fn test_init_replies_ready_with_version() {
        let (code, replies) = run_session(vec![init_frame()]);
        assert_eq!(code, 0);
        assert_eq!(replies.len(), 1);
        let reply = json(&replies[0]);
        assert_eq!(reply["type"], "ready");
        assert!(reply["version"].as_str().unwrap().contains("slimlo-stub"));
    }

    #[test]
    fn test_double_init_is_an_error() {
        let (_, replies) = run_session(vec![init_frame(), init_frame()]);
        assert_eq!(replies.len(), 2);
        assert_eq!(json(&replies[0])["type"], "ready");
        let second = json(&replies[1]);
        assert_eq!(second["type"], "error");
        assert!(second["message"]
            .as_str()
            .unwrap()
            .contains("already initialized"));
    }

    #[test]
    fn test_convert_before_init_is_not_initialized() {
        let convert = serde_json::to_vec(&Request::Convert {
            id: 4,
            input: Some("/tmp/in.docx".into()),
            output: Some("/tmp/out.pdf".into()),
            format: 1,
            options: None,
        })
        .unwrap();

        let (_, replies) = run_session(vec![convert]);
        assert_eq!(replies.len(), 1);
        let reply = json(&replies[0]);
        assert_eq!(reply["type"], "result");
        assert_eq!(reply["id"], 4);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error_code"], ErrorCode::NotInitialized.code());
    }

    #[test]
    fn test_invalid_json_gets_error_reply() {
        let (_, replies) = run_session(vec![b"this is not json {".to_vec()]);
        assert_eq!(replies.len(), 1);
        let reply = json(&replies[0]);
        assert_eq!(reply["type"], "error");
        assert_eq!(reply["message"], "Invalid JSON");
    }

    #[test]
    fn test_unknown_type_is_dropped() {
        let (code, replies) =
            run_session(vec![br#"{"type":"reboot","id":1}"#.to_vec(), init_frame()]);
        assert_eq!(code, 0);
        // Only the init gets a reply; the unknown frame is silently dropped.
        assert_eq!(replies.len(), 1);
        assert_eq!(json(&replies[0])["type"], "ready");
    }

    #[test]
    fn test_empty_frame_is_dropped() {
        let (code, replies) = run_session(vec![Vec::new(), init_frame()]);
        assert_eq!(code, 0);
        assert_eq!(replies.len(), 1);
    }

    #[test]
    fn test_quit_exits_cleanly() {
        let quit = serde_json::to_vec(&Request::Quit).unwrap();
        let (code, replies) = run_session(vec![init_frame(), quit]);
        assert_eq!(code, 0);
        assert_eq!(replies.len(), 1); // quit itself is unacknowledged
    }

    #[test]
    fn test_eos_exits_cleanly() {
        let (code, _) = run_session(vec![]);
        assert_eq!(code, 0);
    }

    #[test]
    fn test_file_conversion_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("a.docx");
        let output = tmp.path().join("a.pdf");
        std::fs::write(&input, "hello").unwrap();

        let convert = serde_json::to_vec(&Request::Convert {
            id: 11,
            input: Some(input.to_string_lossy().into_owned()),
            output: Some(output.to_string_lossy().into_owned()),
            format: 1,
            options: None,
        })
        .unwrap();

        let (_, replies) = run_session(vec![init_frame(), convert]);
        assert_eq!(replies.len(), 2);
        let reply = json(&replies[1]);
        assert_eq!(reply["type"], "result");
        assert_eq!(reply["id"], 11);
        assert_eq!(reply["success"], true);
        assert!(std::fs::read(&output).unwrap().starts_with(b"%PDF"));
    }

    #[test]
    fn test_format_rejected_with_invalid_format() {
        let tmp = tempfile::tempdir().unwrap();
        let input = tmp.path().join("a.xlsx");
        std::fs::write(&input, "cells").unwrap();

        let convert = serde_json::to_vec(&Request::Convert {
            id: 12,
            input: Some(input.to_string_lossy().into_owned()),
            output: Some(tmp.path().join("a.pdf").to_string_lossy().into_owned()),
            format: 2,
            options: None,
        })
        .unwrap();

        let (_, replies) = run_session(vec![init_frame(), convert]);
        let reply = json(&replies[1]);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error_code"], ErrorCode::InvalidFormat.code());
        assert!(!tmp.path().join("a.pdf").exists());
    }

    #[test]
    fn test_missing_paths_are_invalid_argument() {
        let convert = br#"{"type":"convert","id":13,"format":1}"#.to_vec();
        let (_, replies) = run_session(vec![init_frame(), convert]);
        let reply = json(&replies[1]);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error_code"], ErrorCode::InvalidArgument.code());
    }

    #[test]
    fn test_buffer_roundtrip_returns_pdf_frame() {
        let doc = b"buffer document body".to_vec();
        let header = serde_json::to_vec(&Request::ConvertBuffer {
            id: 20,
            format: 1,
            data_size: doc.len() as u64,
            options: None,
        })
        .unwrap();

        let (_, replies) = run_session(vec![init_frame(), header, doc]);
        assert_eq!(replies.len(), 3); // ready, buffer_result, pdf bytes
        let reply = json(&replies[1]);
        assert_eq!(reply["type"], "buffer_result");
        assert_eq!(reply["success"], true);

        let declared = reply["data_size"].as_u64().unwrap();
        assert_eq!(replies[2].len() as u64, declared);
        assert!(replies[2].starts_with(b"%PDF"));
    }

    #[test]
    fn test_buffer_size_mismatch_is_invalid_argument() {
        let doc = b"12345".to_vec();
        let header = serde_json::to_vec(&Request::ConvertBuffer {
            id: 21,
            format: 1,
            data_size: 999, // disagrees with the frame below
            options: None,
        })
        .unwrap();

        let (_, replies) = run_session(vec![init_frame(), header, doc]);
        assert_eq!(replies.len(), 2); // no pdf frame on failure
        let reply = json(&replies[1]);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error_code"], ErrorCode::InvalidArgument.code());
    }

    #[test]
    fn test_buffer_load_failure_reports_engine_message() {
        let doc = b"fail-load:corrupt container".to_vec();
        let header = serde_json::to_vec(&Request::ConvertBuffer {
            id: 22,
            format: 1,
            data_size: doc.len() as u64,
            options: None,
        })
        .unwrap();

        let (_, replies) = run_session(vec![init_frame(), header, doc]);
        let reply = json(&replies[1]);
        assert_eq!(reply["success"], false);
        assert_eq!(reply["error_code"], ErrorCode::LoadFailed.code());
        assert_eq!(reply["error_message"], "corrupt container");
    }
}
