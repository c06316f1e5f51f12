//! Tag and URL extraction from free-text prompts.
//!
//! A prompt may reference stored context files with `#path` tags and
//! point at remote content with plain `http(s)://` URLs:
//!
//! ```text
//! Review #rules/style.md against https://github.com/o/r
//!        └──── tag ────┘         └──────── url ───────┘
//! ```
//!
//! Both extractors return distinct matches in left-to-right order of
//! first appearance. No normalization is applied: `#Readme.md` and
//! `#readme.md` are different tags.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::SheetsError;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"https?://(www\.)?[-a-zA-Z0-9@:%._+~#=]{1,256}\.[a-zA-Z0-9()]{1,6}\b([-a-zA-Z0-9()@:%_+.~#?&/=]*)",
    )
    .expect("URL pattern is valid")
});

static TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#[\w/.\-]+").expect("tag pattern is valid"));

static PARTIAL_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([\w/.\-]*)$").expect("partial tag pattern is valid"));

/// Tags and URLs found in one prompt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    /// Tags including the leading `#`.
    pub tags: Vec<String>,
    pub urls: Vec<String>,
}

impl Extracted {
    /// Tag texts with the leading `#` stripped, ready for store lookup.
    pub fn tag_paths(&self) -> Vec<String> {
        self.tags
            .iter()
            .map(|t| t.trim_start_matches('#').to_string())
            .collect()
    }
}

/// Extract both tags and URLs.
///
/// A `#fragment` inside a URL is part of that URL, not a tag.
pub fn extract(prompt: &str) -> Extracted {
    let url_spans: Vec<Range<usize>> = URL_RE.find_iter(prompt).map(|m| m.range()).collect();
    let urls = distinct(URL_RE.find_iter(prompt).map(|m| m.as_str()));
    let tags = distinct(
        TAG_RE
            .find_iter(prompt)
            .filter(|m| !url_spans.iter().any(|span| span.contains(&m.start())))
            .map(|m| m.as_str()),
    );
    Extracted { tags, urls }
}

pub fn extract_urls(prompt: &str) -> Vec<String> {
    distinct(URL_RE.find_iter(prompt).map(|m| m.as_str()))
}

/// Strict variant: at least one URL must be present.
pub fn require_urls(prompt: &str) -> Result<Vec<String>, SheetsError> {
    let urls = extract_urls(prompt);
    if urls.is_empty() {
        return Err(SheetsError::NoUrl);
    }
    Ok(urls)
}

/// The tag being typed at the end of `prefix`, without its `#`.
///
/// Used to drive autocomplete: `"see #src/ma"` yields `Some("src/ma")`,
/// `"see #"` yields `Some("")`, and `"see src"` yields `None`.
pub fn partial_tag(prefix: &str) -> Option<&str> {
    PARTIAL_TAG_RE
        .captures(prefix)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

fn distinct<'a>(matches: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in matches {
        if !out.iter().any(|seen| seen == m) {
            out.push(m.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_prompt_has_nothing() {
        let e = extract("summarize the design in three bullet points");
        assert!(e.tags.is_empty());
        assert!(e.urls.is_empty());
    }

    #[test]
    fn test_tags_in_order() {
        let tags = extract("use #b/two.md then #a-one.txt and #c_3").tags;
        assert_eq!(tags, vec!["#b/two.md", "#a-one.txt", "#c_3"]);
    }

    #[test]
    fn test_urls_in_order() {
        let urls = extract_urls("compare https://z.example.com/x and http://a.example.org/y?q=1");
        assert_eq!(
            urls,
            vec!["https://z.example.com/x", "http://a.example.org/y?q=1"]
        );
    }

    #[test]
    fn test_repeated_literals_collapse() {
        let e = extract("#a.md https://x.io/p #a.md https://x.io/p #b.md");
        assert_eq!(e.tags, vec!["#a.md", "#b.md"]);
        assert_eq!(e.urls, vec!["https://x.io/p"]);
    }

    #[test]
    fn test_no_case_normalization() {
        let e = extract("#Readme.md #readme.md");
        assert_eq!(e.tags, vec!["#Readme.md", "#readme.md"]);
    }

    #[test]
    fn test_url_fragment_is_not_a_tag() {
        let e = extract("read https://docs.rs/regex/latest/regex/#syntax with #notes.md");
        assert_eq!(e.urls, vec!["https://docs.rs/regex/latest/regex/#syntax"]);
        assert_eq!(e.tags, vec!["#notes.md"]);
    }

    #[test]
    fn test_tag_paths_strip_hash() {
        let e = extract("#rules/style.md #x");
        assert_eq!(e.tag_paths(), vec!["rules/style.md", "x"]);
    }

    #[test]
    fn test_github_urls_extracted_whole() {
        let urls = extract_urls("look at https://github.com/o/r/blob/main/x/y.py please");
        assert_eq!(urls, vec!["https://github.com/o/r/blob/main/x/y.py"]);
    }

    #[test]
    fn test_require_urls() {
        assert!(matches!(
            require_urls("no links here"),
            Err(SheetsError::NoUrl)
        ));
        assert_eq!(
            require_urls("see https://example.com").unwrap(),
            vec!["https://example.com"]
        );
    }

    #[test]
    fn test_partial_tag() {
        assert_eq!(partial_tag("see #src/ma"), Some("src/ma"));
        assert_eq!(partial_tag("see #"), Some(""));
        assert_eq!(partial_tag("see src"), None);
        assert_eq!(partial_tag("#done and more"), None);
    }
}
