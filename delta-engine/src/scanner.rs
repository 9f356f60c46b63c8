//! Detects award tokens in comment bodies, ignoring quotes and code blocks.

/// Decodes the HTML entities Reddit applies to stored markdown.
pub fn unescape_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    text.replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x200B;", "\u{200B}")
        .replace("&amp;", "&")
}

/// A line indented four spaces (code) or starting with `>` after optional
/// spaces (quote).
pub fn is_skippable_line(line: &str) -> bool {
    if line.starts_with("    ") {
        return true;
    }
    let line = unescape_entities(line);
    line.trim_start_matches(' ').starts_with('>')
}

/// Returns true when any token appears in a line outside quote/code regions.
///
/// A skippable line suppresses every following line until a blank line, even
/// when those lines are not marked themselves.
pub fn contains_token<S: AsRef<str>>(text: &str, tokens: &[S]) -> bool {
    let mut in_quote = false;
    for line in text.split('\n') {
        if line.is_empty() {
            in_quote = false;
        }
        if in_quote {
            continue;
        }
        if is_skippable_line(line) {
            in_quote = true;
            continue;
        }
        if tokens.iter().any(|token| line.contains(token.as_ref())) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: [&str; 2] = ["∆", "!delta"];

    #[test]
    fn test_empty_input() {
        assert!(!contains_token("", &TOKENS));
    }

    #[test]
    fn test_plain_lines() {
        assert!(contains_token("That changed my mind !delta", &TOKENS));
        assert!(contains_token("first line\nsecond ∆ line", &TOKENS));
        assert!(!contains_token("no award here\nnor here", &TOKENS));
    }

    #[test]
    fn test_match_is_case_sensitive() {
        assert!(!contains_token("!DELTA", &TOKENS));
    }

    #[test]
    fn test_quoted_token_is_ignored() {
        assert!(!contains_token("> you said !delta", &TOKENS));
        assert!(!contains_token("&gt; you said !delta", &TOKENS));
        assert!(!contains_token("   &gt; indented quote ∆", &TOKENS));
    }

    #[test]
    fn test_code_block_is_ignored() {
        assert!(!contains_token("    let x = \"!delta\";", &TOKENS));
    }

    #[test]
    fn test_quote_suppresses_until_blank_line() {
        let text = "> quoted intro\ncontinuation with !delta";
        assert!(!contains_token(text, &TOKENS));

        let text = "> quoted intro\ncontinuation\n\nreal award !delta";
        assert!(contains_token(text, &TOKENS));
    }

    #[test]
    fn test_unescape_entities() {
        assert_eq!(unescape_entities("a &amp;gt; b"), "a &gt; b");
        assert_eq!(unescape_entities("&lt;b&gt;"), "<b>");
    }
}
