//! Prompt composition.
//!
//! Builds the single user-role message sent to the completion API. The
//! order is fixed: preamble, developer context, content to analyze, the
//! user's request, an optional mode directive, then the closing report
//! instructions. Everything the model should read comes before the
//! directive to generate.

use std::fmt;

/// Where a [`ContentBlock`] came from. Rendered as the block's label line.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockOrigin {
    /// A stored context entry, by path.
    File(String),
    /// A raw file resolved from a GitHub blob URL.
    GithubFile(String),
    /// A repository README.
    GithubRepo { owner: String, repo: String },
    /// A GitHub URL whose content could not be resolved.
    GithubUrl(String),
    /// Any other URL.
    Url(String),
}

impl fmt::Display for BlockOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockOrigin::File(path) => write!(f, "File: {}", path),
            BlockOrigin::GithubFile(path) => write!(f, "GitHub File: {}", path),
            BlockOrigin::GithubRepo { owner, repo } => {
                write!(f, "GitHub Repository: {}/{}", owner, repo)
            }
            BlockOrigin::GithubUrl(url) => write!(f, "GitHub URL: {}", url),
            BlockOrigin::Url(url) => write!(f, "URL: {}", url),
        }
    }
}

/// Request-scoped text tagged with its origin. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub origin: BlockOrigin,
    pub body: String,
}

pub const UNAVAILABLE: &str = "[Unable to fetch content]";

impl ContentBlock {
    pub fn new(origin: BlockOrigin, body: impl Into<String>) -> Self {
        Self {
            origin,
            body: body.into(),
        }
    }

    /// Placeholder for a GitHub URL whose content could not be fetched.
    pub fn unavailable(url: &str) -> Self {
        Self::new(BlockOrigin::GithubUrl(url.to_string()), UNAVAILABLE)
    }

    /// Inline error text standing in for a failed fetch.
    pub fn fetch_error(origin: BlockOrigin, message: impl fmt::Display) -> Self {
        Self::new(origin, format!("Error fetching: {}", message))
    }

    /// The delimited form embedded in the prompt.
    pub fn render(&self) -> String {
        format!("\n\n---\n{}\n---\n{}\n", self.origin, self.body)
    }
}

/// Optional analysis focus appended to the instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Vision,
    Design,
    Audit,
    Create,
    Brand,
}

impl Mode {
    /// Unknown mode names are ignored rather than rejected.
    pub fn parse(name: &str) -> Option<Mode> {
        match name.trim().to_ascii_lowercase().as_str() {
            "vision" => Some(Mode::Vision),
            "design" => Some(Mode::Design),
            "audit" => Some(Mode::Audit),
            "create" => Some(Mode::Create),
            "brand" => Some(Mode::Brand),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Mode::Vision => "vision",
            Mode::Design => "design",
            Mode::Audit => "audit",
            Mode::Create => "create",
            Mode::Brand => "brand",
        }
    }

    fn directive(self) -> &'static str {
        match self {
            Mode::Vision => "Channel minimalist philosophy and reimagine products with transformative AI experiences.",
            Mode::Design => "Focus on beautiful, functional design systems and component architectures.",
            Mode::Audit => "Conduct thorough security and code quality analysis with specific recommendations.",
            Mode::Create => "Generate production-ready code with modern patterns and best practices.",
            Mode::Brand => "Develop comprehensive brand identity and go-to-market strategies.",
        }
    }
}

const PREAMBLE: &str = "You are an expert developer analyst. Your task is to perform deep research and analysis on the provided content.";

const CLOSING: &str = "Provide a comprehensive developer report that includes:
1. Deep analysis of the codebase/content structure
2. Key patterns, techniques, and concepts identified
3. Specific suggestions for improvements or applications
4. Code quality assessment and architectural insights
5. Potential security concerns or performance optimizations
6. Recommended tools, libraries, or approaches
7. Clear markdown formatting with headings, lists, and code blocks

Format your response in a clear, structured manner using markdown. Be thorough and technical.";

/// Inputs to [`compose_prompt`].
#[derive(Debug, Clone, Copy)]
pub struct PromptParts<'a> {
    pub context: &'a [ContentBlock],
    pub content: &'a [ContentBlock],
    pub prompt: &'a str,
    pub mode: Option<Mode>,
}

/// Assemble the full prompt. Empty sections are omitted entirely.
pub fn compose_prompt(parts: PromptParts<'_>) -> String {
    let mut sections: Vec<String> = vec![PREAMBLE.to_string()];

    if !parts.context.is_empty() {
        sections.push(format!("Developer Context:{}", render_blocks(parts.context)));
    }
    if !parts.content.is_empty() {
        sections.push(format!("Content to Analyze:{}", render_blocks(parts.content)));
    }

    sections.push(format!("User Request: {}", parts.prompt));

    if let Some(mode) = parts.mode {
        sections.push(format!("Mode: {}\n{}", mode.name(), mode.directive()));
    }

    sections.push(CLOSING.to_string());
    sections.join("\n\n")
}

fn render_blocks(blocks: &[ContentBlock]) -> String {
    blocks.iter().map(ContentBlock::render).collect()
}
