//! Helpers for rendering tool payloads into log lines.

/// Largest byte index `<= i` that sits on a UTF-8 char boundary.
fn floor_char_boundary(s: &str, i: usize) -> usize {
    if i >= s.len() {
        return s.len();
    }
    let mut pos = i;
    while pos > 0 && !s.is_char_boundary(pos) {
        pos -= 1;
    }
    pos
}

/// Truncate `&str` to at most `max_bytes`, never splitting a UTF-8 codepoint.
pub fn truncate_str(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        s
    } else {
        &s[..floor_char_boundary(s, max_bytes)]
    }
}

/// Render a JSON value as a single bounded log line.
///
/// Strings are shown without surrounding quotes; everything else is compact
/// JSON. An ellipsis marks a cut.
pub fn preview(value: &serde_json::Value, max_bytes: usize) -> String {
    let rendered = match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let cut = truncate_str(&rendered, max_bytes);
    if cut.len() < rendered.len() {
        format!("{cut}…")
    } else {
        rendered
    }
}
