use chrono::{DateTime, Utc};

use crate::interval::resolve_datetime_format;
use crate::model::NavigationFlavor;
use crate::timeline::Frame;

// Longest tokens first so `MMMM` wins over `MM`.
const TOKENS: &[(&str, &str)] = &[
    ("YYYY", "%Y"),
    ("MMMM", "%B"),
    ("MMM", "%b"),
    ("MM", "%m"),
    ("DD", "%d"),
    ("HH", "%H"),
    ("hh", "%I"),
    ("mm", "%M"),
    ("ss", "%S"),
    ("YY", "%y"),
    ("A", "%p"),
];

/// Text shown in the dashboard header for a frame.
///
/// Window frames are labelled with their start, expanding frames with how far they
/// have grown.
pub fn frame_label(frame: &Frame, configured_format: Option<&str>) -> String {
    let format = resolve_datetime_format(configured_format, &frame.interval);
    let instant = match frame.flavor {
        NavigationFlavor::Window => frame.effective_from,
        NavigationFlavor::Expand => frame.effective_to,
    };
    format_moment(instant, &format)
}

/// Render a moment.js style format (`YYYY-MM-DD HH:mm`, `[at] HH:mm`) with chrono.
pub fn format_moment(instant: DateTime<Utc>, format: &str) -> String {
    let mut strftime = String::with_capacity(format.len() * 2);
    let mut rest = format;
    while let Some(ch) = rest.chars().next() {
        if ch == '[' {
            if let Some(close) = rest.find(']') {
                push_literal(&mut strftime, &rest[1..close]);
                rest = &rest[close + 1..];
                continue;
            }
        }
        if let Some((token, directive)) = TOKENS.iter().find(|(token, _)| rest.starts_with(token)) {
            strftime.push_str(directive);
            rest = &rest[token.len()..];
            continue;
        }
        push_literal(&mut strftime, &rest[..ch.len_utf8()]);
        rest = &rest[ch.len_utf8()..];
    }
    instant.format(&strftime).to_string()
}

fn push_literal(out: &mut String, literal: &str) {
    for ch in literal.chars() {
        if ch == '%' {
            out.push_str("%%");
        } else {
            out.push(ch);
        }
    }
}
