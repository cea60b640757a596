//! Token estimation for budget enforcement
//!
//! Budgets use the same rough approximation everywhere (~4 characters per
//! token) so per-sub-query and global ceilings stay comparable.

/// Characters per token used by the estimator
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate token count of a text (rounded up)
pub fn estimate_tokens(text: &str) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(CHARS_PER_TOKEN)
}

/// Longest character prefix of `text` whose estimate fits in `max_tokens`
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> &str {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "§§§§§§§§§§";
        let cut = truncate_to_tokens(text, 2);
        assert_eq!(cut.chars().count(), 8);
        assert!(estimate_tokens(cut) <= 2);
        assert_eq!(truncate_to_tokens("short", 10), "short");
    }
}
