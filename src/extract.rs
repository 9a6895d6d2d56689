// src/extract.rs
//! Excerpt extraction from entry bodies. Tolerant of broken markup: anything
//! that cannot be read degrades to an empty excerpt instead of an error.

use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_EXCERPT_MAX_CHARS: usize = 4_000;

// First <p> block. It ends at its closing tag, at the next <p>, at the close of an
// enclosing block, or at end of input (tidy-style implicit close).
static RE_FIRST_P: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<p(?:\s[^>]*)?>(.*?)(?:</p\s*>|<p[\s>]|</(?:div|body|td|li|section|article)\s*>|$)")
        .expect("first-paragraph regex")
});
static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)</?[^>]*>").expect("tag regex"));
// A tag cut off by the end of input, e.g. `Hello <b`.
static RE_DANGLING_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*$").expect("dangling tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Normalize text: strip tags, decode entities, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let out = RE_TAGS.replace_all(s, " ");
    let out = RE_DANGLING_TAG.replace(&out, "");
    let out = html_escape::decode_html_entities(&out)
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    RE_WS.replace_all(&out, " ").trim().to_string()
}

#[derive(Debug, Clone, Copy)]
pub struct TextExtractor {
    max_chars: usize,
}

impl Default for TextExtractor {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_EXCERPT_MAX_CHARS,
        }
    }
}

impl TextExtractor {
    pub fn with_max_chars(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Text of the first paragraph of `markup`, or "" when there is none.
    /// A body without any markup counts as a single paragraph.
    pub fn excerpt(&self, markup: &str) -> String {
        let block = if markup.contains('<') {
            match RE_FIRST_P.captures(markup).and_then(|c| c.get(1)) {
                Some(m) => m.as_str(),
                None => return String::new(),
            }
        } else {
            markup
        };

        let mut text = normalize_text(block);
        if text.chars().count() > self.max_chars {
            text = text.chars().take(self.max_chars).collect();
        }
        text
    }
}
