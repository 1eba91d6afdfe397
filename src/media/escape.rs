//! Escaping for text and paths embedded in ffmpeg filter graphs.

/// Escape text for a single-quoted `drawtext=text='...'` value.
pub fn escape_drawtext(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("'\\''"),
            ':' => out.push_str("\\:"),
            '%' => out.push_str("\\%"),
            _ => out.push(c),
        }
    }
    out
}

/// Escape a file path used as a filter option value (e.g. `subtitles=`).
///
/// Backslashes become forward slashes so Windows paths survive the filter
/// parser.
pub fn escape_filter_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        match c {
            '\\' => out.push('/'),
            ':' | '\'' | ',' | ';' | '[' | ']' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
