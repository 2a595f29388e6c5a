use std::fmt;

use scraper::{ElementRef, Html};

/// Structural address of an element: element-child indices walked down from `<html>`.
///
/// A path is not a live reference. It is resolved against a fresh snapshot at
/// every step, and it can be rendered as a CSS selector for live drivers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct NodePath(Vec<usize>);

impl NodePath {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// Path of `element` within the tree it belongs to.
    pub fn of(element: ElementRef<'_>) -> Self {
        let mut indices = Vec::new();
        let mut current = *element;
        while let Some(parent) = current.parent() {
            if !parent.value().is_element() {
                break;
            }
            let position = parent
                .children()
                .filter(|child| child.value().is_element())
                .position(|child| child.id() == current.id())
                .unwrap_or(0);
            indices.push(position);
            current = parent;
        }
        indices.reverse();
        Self(indices)
    }

    pub fn resolve<'a>(&self, doc: &'a Html) -> Option<ElementRef<'a>> {
        let mut current = doc.root_element();
        for &index in &self.0 {
            current = current.children().filter_map(ElementRef::wrap).nth(index)?;
        }
        Some(current)
    }

    /// `true` when `other` is this node or one of its descendants.
    pub fn contains(&self, other: &NodePath) -> bool {
        other.0.starts_with(&self.0)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn to_selector(&self) -> String {
        let mut selector = String::from("html");
        for index in &self.0 {
            selector.push_str(&format!(" > :nth-child({})", index + 1));
        }
        selector
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_selector())
    }
}

/// One discovered document candidate, pending extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentEntry {
    pub node: NodePath,
    pub index: usize,
}

/// Normalized, packageable output: sanitized filename plus frontmatter-tagged body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortableDocument {
    filename: String,
    body: String,
}

impl PortableDocument {
    pub(crate) fn new(filename: String, body: String) -> Self {
        Self { filename, body }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub(crate) fn with_filename(self, filename: String) -> Self {
        Self { filename, ..self }
    }
}
