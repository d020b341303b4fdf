//! Share link decoding
//!
//! Accepted shapes:
//! - `http(s)://<host>/t/<code>`
//! - `http(s)://<host>/web/share?code=<code>`
//!
//! Either may be followed (anywhere later in the same text) by an access-code
//! token rendered as `（访问码：<code>）`.

use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

use super::ShareLinkError;

static SHARE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[^/\s]+/(?:t/|web/share\?code=)([A-Za-z0-9]+)(?:.*?访问码[：:]\s*([A-Za-z0-9]+))?")
        .expect("share link pattern is a valid regex")
});

/// Share code plus optional access code, parsed from a share link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDescriptor {
    share_code: String,
    access_code: Option<String>,
}

impl ShareDescriptor {
    /// Extract the share descriptor from free text containing a share link.
    pub fn parse(text: &str) -> Result<Self, ShareLinkError> {
        let captures = SHARE_LINK
            .captures(text)
            .ok_or_else(|| ShareLinkError::Malformed(text.trim().to_string()))?;

        // Group 1 is `+`, so a match always carries a non-empty code
        let share_code = captures
            .get(1)
            .map(|m| m.as_str().to_string())
            .filter(|code| !code.is_empty())
            .ok_or_else(|| ShareLinkError::Malformed(text.trim().to_string()))?;
        let access_code = captures.get(2).map(|m| m.as_str().to_string());

        Ok(Self { share_code, access_code })
    }

    pub fn share_code(&self) -> &str {
        &self.share_code
    }

    pub fn access_code(&self) -> Option<&str> {
        self.access_code.as_deref()
    }

    /// Code as the share-info endpoint expects it: the access-code token is
    /// appended in the same form the link text carried it.
    pub fn query_code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ShareDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.access_code {
            Some(code) => write!(f, "{}（访问码：{}）", self.share_code, code),
            None => write!(f, "{}", self.share_code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_short_link() {
        let desc = ShareDescriptor::parse("https://cloud.189.cn/t/2uiM7zb6nuyi").unwrap();
        assert_eq!(desc.share_code(), "2uiM7zb6nuyi");
        assert_eq!(desc.access_code(), None);
    }

    #[test]
    fn test_parse_web_share_link() {
        let desc = ShareDescriptor::parse("http://cloud.189.cn/web/share?code=MRnMfemUvQ3u").unwrap();
        assert_eq!(desc.share_code(), "MRnMfemUvQ3u");
    }

    #[test]
    fn test_parse_link_inside_text() {
        let text = "鬼滴语2, 2024, https://cloud.189.cn/t/2uiM7zb6nuyi more text";
        let desc = ShareDescriptor::parse(text).unwrap();
        assert_eq!(desc.share_code(), "2uiM7zb6nuyi");
    }

    #[test]
    fn test_access_code_round_trip() {
        let desc = ShareDescriptor::parse(" https://cloud.189.cn/t/Abc123（访问码：AB12）").unwrap();
        assert_eq!(desc.share_code(), "Abc123");
        assert_eq!(desc.access_code(), Some("AB12"));

        let rendered = desc.to_string();
        assert_eq!(rendered, "Abc123（访问码：AB12）");
        assert_eq!(desc.query_code(), rendered);

        let again = ShareDescriptor::parse(&format!("https://cloud.189.cn/t/{}", rendered)).unwrap();
        assert_eq!(again, desc);
    }

    #[test]
    fn test_access_code_ascii_colon() {
        let desc = ShareDescriptor::parse("https://cloud.189.cn/t/Abc123 (访问码: zz9)").unwrap();
        assert_eq!(desc.access_code(), Some("zz9"));
    }

    #[test]
    fn test_malformed_links() {
        for text in [
            "",
            "no link here",
            "https://cloud.189.cn/",
            "https://cloud.189.cn/t/",
            "ftp://cloud.189.cn/t/abc",
            "https://cloud.189.cn/web/share?id=abc",
        ] {
            assert!(
                matches!(ShareDescriptor::parse(text), Err(ShareLinkError::Malformed(_))),
                "expected malformed: {text:?}"
            );
        }
    }
}
