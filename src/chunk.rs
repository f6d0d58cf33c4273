//! Text windowing ahead of embedding.
//!
//! Documents are first cut to a character budget, then split into windows
//! of at most `max_tokens` whitespace-separated words. Each window is the
//! words re-joined with single spaces.

/// First `max_chars` characters of `text`. Never splits a code point.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Whitespace tokens grouped into windows of at most `max_tokens`.
/// Empty or blank input yields no windows.
pub fn split_words(text: &str, max_tokens: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let words: Vec<&str> = text.split_whitespace().collect();
    words
        .chunks(max_tokens)
        .map(|window| window.join(" "))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_chars("Hello, world!", 8192), "Hello, world!");
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(10);
        let cut = truncate_chars(&text, 4);
        assert_eq!(cut.chars().count(), 4);
        assert_eq!(cut, "éééé");
    }

    #[test]
    fn test_empty_text_has_no_windows() {
        assert!(split_words("", 8192).is_empty());
        assert!(split_words(" \n\t ", 8192).is_empty());
    }

    #[test]
    fn test_small_text_single_window() {
        let windows = split_words("105 CMR 590.000:\n\nState  Sanitary Code", 8192);
        assert_eq!(windows, vec!["105 CMR 590.000: State Sanitary Code"]);
    }

    #[test]
    fn test_windows_respect_max_tokens() {
        let text = (0..25)
            .map(|i| format!("w{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let windows = split_words(&text, 10);
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].split(' ').count(), 10);
        assert_eq!(windows[2], "w20 w21 w22 w23 w24");
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha Beta\n\nGamma Delta";
        assert_eq!(split_words(text, 3), split_words(text, 3));
    }
}
