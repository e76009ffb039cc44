//! Text helpers shared by the merge heuristics and log/preview surfaces.
//!
//! Remote fragments regularly carry zero-width joiners, BOMs, or stray
//! control bytes around otherwise empty text. Renderability checks must look
//! through those, and previews must cut on character boundaries.

/// True for characters that never produce visible output.
pub fn is_invisible(ch: char) -> bool {
    ch.is_whitespace()
        || ch.is_control()
        || matches!(
            ch,
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' | '\u{00AD}'
        )
}

/// Trim whitespace, control, and zero-width characters from both ends.
pub fn visible_trim(text: &str) -> &str {
    text.trim_matches(is_invisible)
}

/// True when `text` contains at least one visible character.
pub fn has_visible_text(text: &str) -> bool {
    !visible_trim(text).is_empty()
}

/// Truncate by characters and append `suffix` when truncation occurs.
pub fn truncate_with_suffix_by_chars(text: &str, max_chars: usize, suffix: &str) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars).collect();
    format!("{prefix}{suffix}")
}

/// First non-empty line of `text`, truncated for one-line previews.
pub fn first_line_preview(text: &str, max_chars: usize) -> String {
    let line = text
        .lines()
        .map(visible_trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();
    truncate_with_suffix_by_chars(line, max_chars, "…")
}
