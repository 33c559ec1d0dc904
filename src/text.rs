//! Text shaping helpers: character-window truncation and spoken-delivery
//! normalization.

use regex::Regex;

/// Truncate to at most `max_chars` characters, respecting char boundaries.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Rewrites narrative text for spoken delivery: expands common scholarly
/// abbreviations, strips markdown markup, and normalizes punctuation so the
/// renderer gets flowing sentences instead of layout artifacts.
pub struct SpeechFormatter {
    markup: Regex,
    paragraph_break: Regex,
    whitespace_run: Regex,
    doubled_period: Regex,
}

/// Abbreviations spelled out before rendering. Matched literally.
const ABBREVIATIONS: [(&str, &str); 7] = [
    ("et al.", "and colleagues"),
    ("e.g.", "for example"),
    ("i.e.", "that is"),
    ("vs.", "versus"),
    ("cf.", "compare"),
    ("Fig.", "Figure"),
    ("Eq.", "Equation"),
];

impl SpeechFormatter {
    pub fn new() -> Self {
        Self {
            markup: Regex::new(r"[#*_`>]+").unwrap(),
            paragraph_break: Regex::new(r"\s*\n\s*\n\s*").unwrap(),
            whitespace_run: Regex::new(r"[ \t\n]+").unwrap(),
            doubled_period: Regex::new(r"\.(\s*\.)+").unwrap(),
        }
    }

    pub fn format(&self, text: &str) -> String {
        let mut out = text.to_string();
        for (abbrev, spoken) in ABBREVIATIONS {
            out = out.replace(abbrev, spoken);
        }
        out = self.markup.replace_all(&out, "").into_owned();
        out = self.paragraph_break.replace_all(&out, ". ").into_owned();
        out = self.whitespace_run.replace_all(&out, " ").into_owned();
        out = self.doubled_period.replace_all(&out, ".").into_owned();
        out.trim().to_string()
    }
}

impl Default for SpeechFormatter {
    fn default() -> Self {
        Self::new()
    }
}
