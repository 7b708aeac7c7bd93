use std::borrow::Cow;

/// Removes characters that are not allowed in an XML 1.0 document.
///
/// Feed titles and descriptions are copied verbatim into the published
/// feed, so control characters from upstream documents would otherwise make
/// the output unparseable. Strips C0 controls other than tab, newline and
/// carriage return, DEL, and the noncharacters U+FFFE / U+FFFF.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_disallowed) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|c| !is_disallowed(*c)).collect())
}

fn is_disallowed(c: char) -> bool {
    match c {
        '\t' | '\n' | '\r' => false,
        '\u{0}'..='\u{1f}' | '\u{7f}' => true,
        '\u{fffe}' | '\u{ffff}' => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_is_borrowed() {
        let s = "起業家のためのニュース";
        assert!(matches!(strip_control_chars(s), Cow::Borrowed(_)));
    }

    #[test]
    fn test_preserves_tabs_newlines_cr() {
        assert_eq!(strip_control_chars("a\tb\nc\rd"), "a\tb\nc\rd");
    }

    #[test]
    fn test_removes_controls_and_escape() {
        assert_eq!(strip_control_chars("Evil\x1b[31m Feed\x07"), "Evil[31m Feed");
        assert_eq!(strip_control_chars("del\x7f"), "del");
    }

    #[test]
    fn test_removes_noncharacters() {
        assert_eq!(strip_control_chars("x\u{fffe}y\u{ffff}"), "xy");
    }
}
