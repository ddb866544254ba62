//! Character-safe head/tail truncation.
//!
//! Unlike a byte-slice truncation, this counts and slices by `char` so it
//! never splits a multi-byte UTF-8 sequence and can't panic or corrupt
//! output on non-ASCII text.

/// Truncate `s` to at most `head + tail` characters, keeping the first
/// `head` and last `tail` characters and replacing the middle with a marker
/// that states exactly how many characters were omitted. Returns `s`
/// unchanged if it already fits.
pub fn truncate(s: &str, head: usize, tail: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    let total = chars.len();
    if total <= head + tail {
        return s.to_string();
    }

    let head_part: String = chars[..head].iter().collect();
    let tail_part: String = chars[total - tail..].iter().collect();
    let omitted = total - head - tail;

    format!(
        "{head_part}\n\n[... {omitted} characters omitted ...]\n\n{tail_part}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_strings_are_unchanged() {
        let s = "hello world";
        assert_eq!(truncate(s, 100, 100), s);
    }

    #[test]
    fn exact_boundary_is_unchanged() {
        let s = "a".repeat(10);
        assert_eq!(truncate(&s, 5, 5), s);
    }

    #[test]
    fn long_strings_are_truncated_with_exact_count() {
        let s = "a".repeat(20);
        let out = truncate(&s, 3, 3);
        assert!(out.starts_with("aaa\n"));
        assert!(out.ends_with("\naaa"));
        assert!(out.contains("14 characters omitted"));
    }

    #[test]
    fn multi_byte_chars_are_not_split() {
        let s = "日".repeat(20);
        let out = truncate(&s, 3, 3);
        // Must remain valid UTF-8 and contain whole characters only.
        assert!(out.starts_with("日日日\n"));
        assert!(out.ends_with("\n日日日"));
    }

    #[test]
    fn truncation_is_idempotent_on_already_short_marker() {
        let s = "short";
        assert_eq!(truncate(s, 10, 10), truncate(&truncate(s, 10, 10), 10, 10));
    }
}
