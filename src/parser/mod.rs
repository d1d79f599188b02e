//! Word splitting for command arguments.
//!
//! Arguments are handed to the engine as free text (`"-n 1"` is two words),
//! so every token is split before it reaches `execvp`.

mod combinators;

use combinators::parse_words;

/// Split `input` into words. Quotes group words and are removed.
///
/// An unbalanced quote falls back to plain whitespace splitting.
pub fn split_words(input: &str) -> Vec<String> {
    match parse_words(input) {
        Ok(("", words)) => words,
        _ => input.split_whitespace().map(str::to_string).collect(),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_simple() {
        assert_eq!(split_words("-n 1"), vec!["-n", "1"]);
    }

    #[test]
    fn test_extra_spaces() {
        assert_eq!(split_words("  -l   tmp  "), vec!["-l", "tmp"]);
    }

    #[test]
    fn test_empty() {
        assert!(split_words("").is_empty());
        assert!(split_words("   ").is_empty());
    }

    #[test]
    fn test_double_quotes_group() {
        assert_eq!(split_words("echo \"hello world\""), vec!["echo", "hello world"]);
    }

    #[test]
    fn test_single_quotes_group() {
        assert_eq!(split_words("-e 's/a b/c/'"), vec!["-e", "s/a b/c/"]);
    }

    #[test]
    fn test_glued_pieces() {
        assert_eq!(split_words("--name=\"a b\"x"), vec!["--name=a bx"]);
    }

    #[test]
    fn test_empty_quotes_make_empty_word() {
        assert_eq!(split_words("a \"\" b"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_unbalanced_quote_falls_back() {
        assert_eq!(split_words("it's here"), vec!["it's", "here"]);
    }
}
