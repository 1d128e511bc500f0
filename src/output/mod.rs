// Output formatting — terminal display and report file generation.

pub mod report;
pub mod terminal;

/// Truncate a string to at most `max_chars` characters, appending "..." if truncated.
///
/// Unlike byte slicing (`&text[..28]`), this respects UTF-8 character boundaries
/// and will never panic on multi-byte characters in review-derived labels.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= max_chars {
        text.to_string()
    } else {
        let truncated: String = text.chars().take(max_chars).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_short_string_unchanged() {
        assert_eq!(truncate_chars("late order", 28), "late order");
    }

    #[test]
    fn truncate_long_string_appends_ellipsis() {
        assert_eq!(truncate_chars("abcdefgh", 5), "abcde...");
    }

    #[test]
    fn truncate_respects_multibyte_chars() {
        // would panic with byte slicing
        assert_eq!(truncate_chars("ótima comida péssima entrega", 12), "ótima comida...");
    }
}
