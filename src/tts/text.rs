//! Preparing response text for speech.

/// Markdown marker characters that should not be read aloud.
pub const MARKUP_CHARS: &[char] = &['#', '*', '`', '_', '~'];

/// Remove markdown marker characters.
///
/// Removal is per character, so if `a` is a prefix of `b` then
/// `speakable_text(a)` is a prefix of `speakable_text(b)`. Offsets computed
/// on an earlier, shorter response therefore stay valid.
///
/// ```
/// use voxstream::tts::text::speakable_text;
///
/// assert_eq!(speakable_text("## **Bold** `code`"), " Bold code");
/// ```
pub fn speakable_text(markdown: &str) -> String {
    markdown.chars().filter(|c| !MARKUP_CHARS.contains(c)).collect()
}
