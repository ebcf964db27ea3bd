//! Compact output rendering helpers for CLI and hook surfaces.

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Cut `input` to at most `max_chars` characters without splitting a
/// UTF-8 sequence. Returns the input unchanged when it already fits.
pub fn truncate_chars(input: &str, max_chars: usize) -> &str {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &input[..byte_idx],
        None => input,
    }
}

/// Join agent names for display; an empty list renders as `-`.
pub fn agent_list(agents: &[String]) -> String {
    if agents.is_empty() {
        "-".to_string()
    } else {
        agents.join(" -> ")
    }
}
