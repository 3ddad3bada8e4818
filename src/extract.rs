#![forbid(unsafe_code)]

//! Extraction of a canonical video identifier from user input.
//!
//! Input is either a bare 11-character id or a YouTube URL in one of the
//! common shapes (`watch?v=`, `youtu.be/`, `embed/`, `/v/`, or a `watch` URL
//! with other query parameters before `v=`).

use regex::Regex;
use std::sync::LazyLock;

/// URL shapes tried in order; the first capture wins. Each capture stops at
/// the first `&`, newline, `?`, or `#` after the id.
static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([^&\n?#]+)",
        r"youtube\.com/v/([^&\n?#]+)",
        r"youtube\.com/watch\?.*v=([^&\n?#]+)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static pattern compiles"))
    .collect()
});

fn is_bare_id(input: &str) -> bool {
    input.len() == 11
        && input
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-')
}

/// Returns the canonical video id, or `None` when the input is neither a bare
/// id nor a recognizable URL. No existence check is performed here.
pub fn video_id(input: &str) -> Option<String> {
    if input.is_empty() {
        return None;
    }
    if is_bare_id(input) {
        return Some(input.to_string());
    }
    URL_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(input).map(|captures| captures[1].to_string()))
}
