//! Utility functions for text processing.
//!
//! Regex patterns are declared with `lazy_regex!` so they are validated at
//! compile time and initialized on first use.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;

/// Match the first link in a message: an http(s) URL or a bare `www.` host
static RE_URL: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r#"https?://[^\s<>"']+|www\.[^\s<>"']+"#);

/// Returns the first link found in `text`, if any.
///
/// # Examples
///
/// ```
/// use vidrelay::utils::extract_url;
/// assert_eq!(
///     extract_url("look at https://youtu.be/abc please"),
///     Some("https://youtu.be/abc")
/// );
/// assert_eq!(extract_url("hello"), None);
/// ```
#[must_use]
pub fn extract_url(text: &str) -> Option<&str> {
    RE_URL.find(text).map(|m| m.as_str())
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// This is UTF-8 safe and will not panic on multi-byte characters.
///
/// # Examples
///
/// ```
/// use vidrelay::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_unicode() {
        let s = "Привет, мир!";
        assert_eq!(truncate_str(s, 6), "Привет");
        assert_eq!(truncate_str(s, 50), "Привет, мир!");
    }

    #[test]
    fn test_extract_url_variants() {
        assert_eq!(
            extract_url("https://www.tiktok.com/@u/video/1"),
            Some("https://www.tiktok.com/@u/video/1")
        );
        assert_eq!(
            extract_url("смотри www.youtube.com/watch?v=x ок"),
            Some("www.youtube.com/watch?v=x")
        );
        assert_eq!(
            extract_url("<http://a.b/c> \"quoted\""),
            Some("http://a.b/c")
        );
    }

    #[test]
    fn test_extract_url_takes_first() {
        assert_eq!(
            extract_url("http://one.example http://two.example"),
            Some("http://one.example")
        );
    }

    #[test]
    fn test_extract_url_none() {
        assert_eq!(extract_url("hello"), None);
        assert_eq!(extract_url(""), None);
        assert_eq!(extract_url("ftp://files.example"), None);
    }
}
