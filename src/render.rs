//! Markdown to HTML for saved sheets.
//!
//! Generated reports are untrusted text: raw HTML in the markdown is
//! escaped and shown literally, and `javascript:` links are neutralised.

use pulldown_cmark::{html, CowStr, Event, Options, Parser, Tag};

use sheets_core::models::Sheet;

fn options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);
    options
}

fn is_script_url(url: &str) -> bool {
    let url = url.trim_start().to_ascii_lowercase();
    url.starts_with("javascript:") || url.starts_with("vbscript:")
}

/// Render markdown to an HTML fragment.
pub fn render_markdown(markdown: &str) -> String {
    let events = Parser::new_ext(markdown, options()).map(|event| match event {
        Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
        Event::Start(Tag::Link {
            link_type,
            dest_url,
            title,
            id,
        }) if is_script_url(&dest_url) => Event::Start(Tag::Link {
            link_type,
            dest_url: CowStr::Borrowed("#"),
            title,
            id,
        }),
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) if is_script_url(&dest_url) => Event::Start(Tag::Image {
            link_type,
            dest_url: CowStr::Borrowed("#"),
            title,
            id,
        }),
        other => other,
    });

    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, events);
    out
}

/// Escape text for use in HTML element content or a quoted attribute.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Writing into a String is infallible.
    let _ = pulldown_cmark_escape::escape_html(&mut out, text);
    out
}

/// Everything the standalone sheet page shows.
#[derive(Debug, Clone)]
pub struct SheetPage {
    pub title: String,
    pub created_at: String,
    pub body_html: String,
}

impl SheetPage {
    pub fn from_sheet(sheet: &Sheet) -> Self {
        let title = if sheet.title.trim().is_empty() {
            "Untitled Sheet".to_string()
        } else {
            sheet.title.clone()
        };
        Self {
            title,
            created_at: sheet.created_at.clone(),
            body_html: render_markdown(&sheet.content),
        }
    }
}

const PAGE_STYLE: &str = "body{max-width:860px;margin:2rem auto;padding:0 1rem;\
font-family:-apple-system,BlinkMacSystemFont,'Segoe UI',sans-serif;line-height:1.6;color:#1a1a1a}\
pre{background:#f5f5f5;padding:1rem;overflow-x:auto;border-radius:4px}\
code{font-family:ui-monospace,Menlo,monospace}\
table{border-collapse:collapse}td,th{border:1px solid #ddd;padding:.4rem .6rem}\
header{color:#666;font-size:.9rem;margin-bottom:2rem}";

/// A complete HTML document for one sheet.
pub fn render_sheet_page(page: &SheetPage) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n\
<title>{title}</title>\n<style>{style}</style>\n</head>\n<body>\n\
<header>{title} &middot; {created}</header>\n<article>\n{body}</article>\n</body>\n</html>\n",
        title = escape_html(&page.title),
        created = escape_html(&page.created_at),
        style = PAGE_STYLE,
        body = page.body_html,
    )
}
