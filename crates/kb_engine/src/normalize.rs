use chrono::{DateTime, SecondsFormat, Utc};
use ego_tree::NodeRef;
use kb_core::RawDocument;
use kb_logging::kb_debug;
use scraper::node::Node;
use scraper::{ElementRef, Html};

use crate::filename::sanitize_filename;
use crate::PortableDocument;

/// Turns a raw title/content pair into a packageable document. Never fails.
pub fn normalize(raw: &RawDocument, exported_at: DateTime<Utc>) -> PortableDocument {
    let body = if looks_like_markup(&raw.content) {
        let stripped = strip_markup(&raw.content);
        if stripped.is_empty() && !raw.content.trim().is_empty() {
            kb_debug!("Stripping emptied {:?}; keeping raw content", raw.title);
            raw.content.trim().to_string()
        } else {
            stripped
        }
    } else {
        raw.content.trim().to_string()
    };

    PortableDocument::new(
        sanitize_filename(&raw.title),
        build_frontmatter(&raw.title, exported_at, &body),
    )
}

pub fn build_frontmatter(title: &str, exported_at: DateTime<Utc>, body: &str) -> String {
    format!(
        "---\ntitle: \"{title}\"\nexported_utc: {exported}\n---\n\n{body}",
        title = escape_title(title),
        exported = exported_at.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

fn escape_title(title: &str) -> String {
    let mut escaped = String::with_capacity(title.len());
    for ch in title.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' | '\r' | '\t' => escaped.push(' '),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn looks_like_markup(content: &str) -> bool {
    content
        .find('<')
        .is_some_and(|open| content[open..].contains('>'))
}

/// Best-effort tag stripping: block tags become paragraph breaks, `<br>` a
/// line break, everything else disappears and only its text survives.
pub fn strip_markup(markup: &str) -> String {
    let fragment = Html::parse_fragment(markup);
    let mut out = PlainText::default();
    for child in fragment.root_element().children() {
        visit_node(child, &mut out);
    }
    out.finish()
}

fn visit_node(node: NodeRef<'_, Node>, out: &mut PlainText) {
    match node.value() {
        Node::Text(text) => out.append_text(text),
        Node::Element(_) => {
            if let Some(element) = ElementRef::wrap(node) {
                visit_element(element, out);
            }
        }
        _ => {
            for child in node.children() {
                visit_node(child, out);
            }
        }
    }
}

fn visit_element(element: ElementRef<'_>, out: &mut PlainText) {
    match element.value().name() {
        "br" => out.line_break(),
        "p" | "div" | "section" | "article" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "li"
        | "ul" | "ol" | "blockquote" | "pre" | "table" | "tr" | "header" | "footer" => {
            out.paragraph_break();
            visit_children(element, out);
            out.paragraph_break();
        }
        "script" | "style" | "noscript" | "template" => {}
        _ => visit_children(element, out),
    }
}

fn visit_children(element: ElementRef<'_>, out: &mut PlainText) {
    for child in element.children() {
        visit_node(child, out);
    }
}

#[derive(Default)]
struct PlainText {
    builder: String,
}

impl PlainText {
    fn last_char(&self) -> Option<char> {
        self.builder.chars().next_back()
    }

    fn append_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() {
                match self.last_char() {
                    None | Some(' ') | Some('\n') => continue,
                    _ => self.builder.push(' '),
                }
            } else {
                self.builder.push(ch);
            }
        }
    }

    fn line_break(&mut self) {
        self.trim_trailing_spaces();
        self.builder.push('\n');
    }

    fn paragraph_break(&mut self) {
        self.trim_trailing_spaces();
        if self.builder.is_empty() || self.builder.ends_with("\n\n") {
            return;
        }
        if self.builder.ends_with('\n') {
            self.builder.push('\n');
        } else {
            self.builder.push_str("\n\n");
        }
    }

    fn trim_trailing_spaces(&mut self) {
        while self.builder.ends_with(' ') {
            self.builder.pop();
        }
    }

    fn finish(self) -> String {
        collapse_blank_runs(self.builder.trim())
    }
}

/// Three or more consecutive newlines become exactly one blank line.
fn collapse_blank_runs(text: &str) -> String {
    let mut collapsed = String::with_capacity(text.len());
    let mut newlines = 0;
    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines <= 2 {
                collapsed.push(ch);
            }
        } else {
            newlines = 0;
            collapsed.push(ch);
        }
    }
    collapsed
}
