
use anyhow::{Result, anyhow};
use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};
use scraper::{ElementRef, Html, Node};
use tracing::debug;

/// Tags preserved by the sanitizer. Everything else is stripped, keeping
/// its text content, except for `script` and `style` whose contents are
/// dropped entirely.
const ALLOWED_TAGS: &[&str] = &[
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "p",
    "strong",
    "em",
    "ul",
    "ol",
    "li",
    "table",
    "thead",
    "tbody",
    "tr",
    "th",
    "td",
    "blockquote",
    "a",
];

const DROPPED_CONTENT_TAGS: &[&str] = &["script", "style"];

/// A content section scoped to its heading hierarchy
#[derive(Debug, Clone, PartialEq)]
pub struct ContentSection {
    /// The heading path (e.g., "Getting Started > Installation")
    pub heading_path: String,
    /// The text content of this section
    pub content: String,
}

/// A page converted to Markdown, split into heading-scoped sections
#[derive(Debug, Clone, PartialEq)]
pub struct MarkdownDocument {
    /// The page title (from the source document, not the body)
    pub title: String,
    /// The full Markdown text
    pub markdown: String,
    /// Sections in document order
    pub sections: Vec<ContentSection>,
}

/// Sanitize HTML, convert it to Markdown, and split into sections
pub fn extract_document(title: &str, html: &str) -> Result<MarkdownDocument> {
    let sanitized = sanitize_html(html);
    let markdown = htmd::convert(&sanitized)
        .map_err(|e| anyhow!("Failed to convert HTML to Markdown: {}", e))?;
    let sections = extract_sections(&markdown, title);

    debug!(
        "Extracted document '{}': {} sections, {} chars markdown",
        title,
        sections.len(),
        markdown.len()
    );

    Ok(MarkdownDocument {
        title: title.to_string(),
        markdown,
        sections,
    })
}

/// Strip all markup outside the allow-list, preserving the text content
/// of removed tags
pub fn sanitize_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    write_sanitized_children(fragment.root_element(), &mut out);
    out
}

fn write_sanitized_children(parent: ElementRef<'_>, out: &mut String) {
    for child in parent.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(&escape_text(text));
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    write_sanitized_element(element, out);
                }
            }
            _ => {}
        }
    }
}

fn write_sanitized_element(element: ElementRef<'_>, out: &mut String) {
    let tag = element.value().name();

    if DROPPED_CONTENT_TAGS.contains(&tag) {
        return;
    }

    if ALLOWED_TAGS.contains(&tag) {
        out.push('<');
        out.push_str(tag);
        // Only anchors keep an attribute, and only `href`
        if tag == "a" {
            if let Some(href) = element.value().attr("href") {
                out.push_str(" href=\"");
                out.push_str(&escape_attr(href));
                out.push('"');
            }
        }
        out.push('>');
        write_sanitized_children(element, out);
        out.push_str("</");
        out.push_str(tag);
        out.push('>');
    } else {
        // Disallowed tag: unwrap it, keep its children
        write_sanitized_children(element, out);
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

/// Split Markdown into sections keyed by their heading path
fn extract_sections(markdown: &str, fallback_title: &str) -> Vec<ContentSection> {
    let mut sections = Vec::new();
    let mut heading_stack: Vec<(u8, String)> = Vec::new();

    let parser = Parser::new(markdown);
    let mut current_content = String::new();
    let mut current_heading_text = String::new();
    let mut in_heading = false;

    let mut flush =
        |heading_stack: &[(u8, String)], current_content: &mut String, fallback: &str| {
            if !current_content.trim().is_empty() {
                sections.push(ContentSection {
                    heading_path: build_heading_path(heading_stack, fallback),
                    content: current_content.trim().to_string(),
                });
            }
            current_content.clear();
        };

    for event in parser {
        match event {
            Event::Start(tag) => match tag {
                Tag::Heading { .. } => {
                    flush(&heading_stack, &mut current_content, fallback_title);
                    in_heading = true;
                    current_heading_text.clear();
                }
                Tag::Paragraph | Tag::List(_) => {
                    if !current_content.is_empty() && !current_content.ends_with('\n') {
                        current_content.push('\n');
                    }
                }
                Tag::Item => {
                    current_content.push_str("- ");
                }
                _ => {}
            },
            Event::End(tag_end) => match tag_end {
                TagEnd::Heading(level) => {
                    if in_heading {
                        if !current_heading_text.trim().is_empty() {
                            update_heading_stack(
                                &mut heading_stack,
                                heading_level_to_u8(level),
                                current_heading_text.trim().to_string(),
                            );
                        }
                        in_heading = false;
                    }
                }
                TagEnd::Paragraph | TagEnd::Item => {
                    current_content.push('\n');
                }
                _ => {}
            },
            Event::Text(text) => {
                if in_heading {
                    current_heading_text.push_str(&text);
                } else {
                    current_content.push_str(&text);
                }
            }
            Event::Code(code) => {
                if in_heading {
                    current_heading_text.push_str(&code);
                } else {
                    current_content.push('`');
                    current_content.push_str(&code);
                    current_content.push('`');
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_heading {
                    current_heading_text.push(' ');
                } else {
                    current_content.push('\n');
                }
            }
            _ => {}
        }
    }

    flush(&heading_stack, &mut current_content, fallback_title);

    sections
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Replace headings at the same or deeper level, then push the new one
fn update_heading_stack(stack: &mut Vec<(u8, String)>, level: u8, text: String) {
    stack.retain(|(l, _)| *l < level);
    stack.push((level, text));
}

fn build_heading_path(stack: &[(u8, String)], fallback: &str) -> String {
    if stack.is_empty() {
        fallback.to_string()
    } else {
        stack
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join(" > ")
    }
}
