//! Movie metadata and folder/file name patterns.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder pattern is a valid regex"));

/// Characters the storage provider rejects in names
const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// What the parser extracted from one detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovieInfo {
    pub title: String,
    pub year: u32,
    #[serde(default)]
    pub video_format: String,
    #[serde(default)]
    pub edition: String,
}

impl MovieInfo {
    pub fn new(title: impl Into<String>, year: u32) -> Self {
        Self {
            title: title.into(),
            year,
            video_format: String::new(),
            edition: String::new(),
        }
    }

    fn field(&self, name: &str) -> Option<String> {
        match name {
            "title" => Some(self.title.clone()),
            "year" => Some(self.year.to_string()),
            "video_format" => Some(self.video_format.clone()),
            "edition" => Some(self.edition.clone()),
            _ => None,
        }
    }

    /// Fill `{title}`, `{year}`, `{video_format}` and `{edition}` in `pattern`.
    /// Unknown placeholders are left as written. Reserved characters in the
    /// result become `_`, and surrounding whitespace is trimmed.
    pub fn render(&self, pattern: &str) -> String {
        let filled = PLACEHOLDER.replace_all(pattern, |caps: &Captures| {
            self.field(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        });
        filled
            .chars()
            .map(|c| if RESERVED_CHARS.contains(&c) { '_' } else { c })
            .collect::<String>()
            .trim()
            .to_string()
    }
}

impl fmt::Display for MovieInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.year)
    }
}
