/// Word tokenization shared by the keyword vectorizer and the exact-match bonus.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    // Unicode-aware: Hangul syllables count as word characters
    WORD.get_or_init(|| Regex::new(r"\w+").expect("static regex"))
}

/// Lowercased `\w+` runs, in order.
pub fn words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    word_regex()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Distinct lowercased words.
pub fn word_set(text: &str) -> HashSet<String> {
    words(text).into_iter().collect()
}
