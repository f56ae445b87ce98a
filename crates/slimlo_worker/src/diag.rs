//! Extraction of structured diagnostics from engine stderr.
//!
//! The interesting lines look like
//! `warn:vcl.fonts:32412:could not select font "Arial"`; everything else is
//! noise. Parsing is best-effort by contract: a malformed line produces a
//! partial diagnostic or nothing at all, never an error.

use slimlo_protocol::{DiagCategory, DiagSeverity, Diagnostic};

const MAX_MESSAGE_LEN: usize = 1024;

const FONT_MARKERS: [&str; 2] = [":vcl.fonts:", ":fonts:"];
const FONT_NAME_PHRASES: [&str; 3] =
    ["could not select font", "could not find font", "not available"];
const SUBSTITUTION_PHRASES: [&str; 3] = ["substitut", "replaced", "using"];

/// Parse one conversion's captured stderr into ordered diagnostics.
/// Only warnings propagate; info-level chatter is dropped.
pub fn parse_diagnostics(text: &str) -> Vec<Diagnostic> {
    text.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<Diagnostic> {
    let line = line.trim_end();
    if line.is_empty() {
        return None;
    }

    // Case-insensitive matching over ASCII keeps byte offsets valid for
    // slicing the original line.
    let lower = line.to_ascii_lowercase();
    let warn_at = lower.find("warn:")?;

    let marker_end = FONT_MARKERS
        .iter()
        .find_map(|marker| lower.find(marker).map(|at| at + marker.len()));

    let (category, font, substituted_with) = match marker_end {
        Some(marker_end) => {
            let font = extract_font_name(line, &lower, marker_end);
            let substituted = font
                .as_ref()
                .and_then(|(_, end)| extract_substitution(line, &lower, *end));
            (
                DiagCategory::Font,
                font.map(|(name, _)| name),
                substituted,
            )
        }
        None => (DiagCategory::General, None, None),
    };

    Some(Diagnostic {
        severity: DiagSeverity::Warning,
        category,
        message: build_message(line, warn_at),
        font,
        substituted_with,
    })
}

/// Font name: the first quoted string after a known phrase, falling back
/// to the first quoted string after the fonts marker. Returns the name and
/// the byte offset just past its closing quote.
fn extract_font_name(line: &str, lower: &str, marker_end: usize) -> Option<(String, usize)> {
    let phrase_end = FONT_NAME_PHRASES
        .iter()
        .find_map(|phrase| lower.find(phrase).map(|at| at + phrase.len()));

    phrase_end
        .and_then(|from| first_quoted(line, from))
        .or_else(|| first_quoted(line, marker_end))
}

/// Substitution target: the first quoted string after a substitution
/// phrase that follows the font name.
fn extract_substitution(line: &str, lower: &str, from: usize) -> Option<String> {
    let tail = &lower[from..];
    let phrase_end = SUBSTITUTION_PHRASES
        .iter()
        .filter_map(|phrase| tail.find(phrase).map(|at| from + at + phrase.len()))
        .min()?;
    first_quoted(line, phrase_end).map(|(name, _)| name)
}

/// First `"…"` quoted span at or after `from`. Returns the contents and the
/// offset just past the closing quote.
fn first_quoted(line: &str, from: usize) -> Option<(String, usize)> {
    let open = line[from..].find('"')? + from + 1;
    let close = line[open..].find('"')? + open;
    Some((line[open..close].to_string(), close + 1))
}

/// Strip the `warn:<category>:<pid>:` prefix and cap the remainder.
fn build_message(line: &str, warn_at: usize) -> String {
    let after_warn = &line[warn_at + "warn:".len()..];
    let mut parts = after_warn.splitn(3, ':');
    let message = match (parts.next(), parts.next(), parts.next()) {
        (Some(_category), Some(_pid), Some(rest)) => rest,
        _ => line,
    };
    cap_message(message.trim_start())
}

fn cap_message(message: &str) -> String {
    if message.len() <= MAX_MESSAGE_LEN {
        return message.to_string();
    }
    let mut end = MAX_MESSAGE_LEN;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}
