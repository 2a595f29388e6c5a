//! Title and content extraction from an opened overlay.
//!
//! Both extractors always produce a string: title falls back to a generated
//! name, content to a marker or an error message.

use chrono::{DateTime, Utc};
use ego_tree::NodeRef;
use kb_logging::{kb_debug, kb_warn};
use scraper::node::{Element, Node};
use scraper::ElementRef;

use crate::locator::{
    content_by_overlay_region, content_by_precise_path, controls_within, control_label, element_text,
    inspect, matches_vocabulary, title_by_overlay_heading, title_by_precise_path, try_strategy,
    ProbeContext, ProbeError, Strategy,
};
use crate::page::{settle, wait};
use crate::{Clock, DocumentEntry, NodePath, Page, PageError, Selectors, SettleTimings};

pub const NO_CONTENT_MARKER: &str = "No content available";
const TITLE_PREVIEW_CHARS: usize = 50;

const TITLE_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "title/precise-path",
        probe: title_from_precise_path,
    },
    Strategy {
        name: "title/overlay-heading",
        probe: title_from_overlay_heading,
    },
    Strategy {
        name: "title/entry-child",
        probe: title_from_entry_child,
    },
    Strategy {
        name: "title/entry-text",
        probe: title_from_entry_text,
    },
];

const CONTENT_STRATEGIES: &[Strategy<String>] = &[
    Strategy {
        name: "content/precise-region",
        probe: content_from_precise_region,
    },
    Strategy {
        name: "content/text-nodes",
        probe: content_from_text_nodes,
    },
    Strategy {
        name: "content/overlay-region",
        probe: content_from_overlay_region,
    },
    Strategy {
        name: "content/overlay-body",
        probe: content_from_overlay_body,
    },
    Strategy {
        name: "content/entry-text",
        probe: content_from_entry_text,
    },
];

/// How to make sure the entry's overlay is showing before reading content.
enum Reopen {
    AlreadyOpen,
    NoCandidate,
    Click(NodePath),
    Nearest(Vec<NodePath>),
}

pub struct Extractor<'p> {
    page: &'p dyn Page,
    selectors: &'p Selectors,
    timings: SettleTimings,
    clock: Clock,
}

impl<'p> Extractor<'p> {
    pub fn new(
        page: &'p dyn Page,
        selectors: &'p Selectors,
        timings: SettleTimings,
        clock: Clock,
    ) -> Self {
        Self {
            page,
            selectors,
            timings,
            clock,
        }
    }

    /// Never empty. Each strategy samples the page after a short settle.
    pub async fn extract_title(&self, entry: &DocumentEntry) -> String {
        for strategy in TITLE_STRATEGIES {
            let markup = match settle(self.page, self.timings.probe()).await {
                Ok(markup) => markup,
                Err(err) => {
                    kb_warn!("{} could not read page: {}", strategy.name, err);
                    continue;
                }
            };
            let found = inspect(&markup, self.selectors, Some(&entry.node), |ctx| {
                try_strategy(strategy, ctx)
            });
            if let Some(title) = found {
                kb_debug!("Entry {} title via {}", entry.index, strategy.name);
                return title;
            }
        }
        fallback_title((self.clock)())
    }

    /// Never empty. Page failures come back as an error message string.
    pub async fn extract_content(&self, entry: &DocumentEntry) -> String {
        match self.read_content(entry).await {
            Ok(content) => content,
            Err(err) => {
                kb_warn!("Content extraction failed for entry {}: {}", entry.index, err);
                format!("Error extracting content: {err}")
            }
        }
    }

    async fn read_content(&self, entry: &DocumentEntry) -> Result<String, PageError> {
        let markup = self.page.content().await?;
        let plan = inspect(&markup, self.selectors, Some(&entry.node), reopen_plan);

        let target = match plan {
            Reopen::AlreadyOpen | Reopen::NoCandidate => None,
            Reopen::Click(target) => Some(target),
            Reopen::Nearest(candidates) => self.nearest(&entry.node, candidates).await?,
        };
        if let Some(target) = target {
            kb_debug!("Re-opening entry {} via {}", entry.index, target);
            self.page.click(&target).await?;
            wait(self.timings.open()).await;
        }

        let markup = self.page.content().await?;
        let content = inspect(&markup, self.selectors, Some(&entry.node), |ctx| {
            CONTENT_STRATEGIES.iter().find_map(|strategy| {
                let found = try_strategy(strategy, ctx);
                if found.is_some() {
                    kb_debug!("Entry {} content via {}", entry.index, strategy.name);
                }
                found
            })
        });
        Ok(content.unwrap_or_else(|| NO_CONTENT_MARKER.to_string()))
    }

    /// Candidate whose on-screen centre is closest to the entry's.
    async fn nearest(
        &self,
        entry: &NodePath,
        candidates: Vec<NodePath>,
    ) -> Result<Option<NodePath>, PageError> {
        let first = candidates.first().cloned();
        let Some((ex, ey)) = self.page.midpoint(entry).await? else {
            return Ok(first);
        };
        let mut best: Option<(f64, NodePath)> = None;
        for candidate in candidates {
            if let Some((cx, cy)) = self.page.midpoint(&candidate).await? {
                let distance = (cx - ex).hypot(cy - ey);
                if best.as_ref().map_or(true, |(d, _)| distance < *d) {
                    best = Some((distance, candidate));
                }
            }
        }
        Ok(best.map(|(_, candidate)| candidate).or(first))
    }
}

pub fn fallback_title(now: DateTime<Utc>) -> String {
    format!("Document_{}", now.timestamp_millis())
}

fn reopen_plan(ctx: &ProbeContext<'_>) -> Reopen {
    if ctx.overlay().is_some() {
        return Reopen::AlreadyOpen;
    }
    let candidates: Vec<NodePath> = controls_within(ctx.doc.root_element(), &ctx.selectors.controls)
        .into_iter()
        .filter(|control| matches_vocabulary(&control_label(*control), &ctx.selectors.open_vocabulary))
        .map(NodePath::of)
        .collect();

    let entry = ctx.scope.map(NodePath::of);
    if let Some(entry) = &entry {
        if let Some(inside) = candidates.iter().find(|c| entry.contains(c)) {
            return Reopen::Click(inside.clone());
        }
    }
    match candidates.len() {
        0 => Reopen::NoCandidate,
        1 => Reopen::Click(candidates[0].clone()),
        _ => Reopen::Nearest(candidates),
    }
}

fn resolve<'a>(ctx: &ProbeContext<'a>, path: Option<NodePath>) -> Option<ElementRef<'a>> {
    path.and_then(|p| p.resolve(ctx.doc))
}

fn title_from_precise_path(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    Ok(resolve(ctx, title_by_precise_path(ctx)?).map(element_text))
}

fn title_from_overlay_heading(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    Ok(resolve(ctx, title_by_overlay_heading(ctx)?).map(element_text))
}

fn title_from_entry_child(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    let entry = ctx.scope.ok_or(ProbeError::DetachedScope)?;
    Ok(entry
        .children()
        .filter_map(ElementRef::wrap)
        .filter(|child| !is_button(child.value()))
        .map(element_text)
        .find(|text| !text.is_empty()))
}

fn title_from_entry_text(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    let entry = ctx.scope.ok_or(ProbeError::DetachedScope)?;
    let text = element_text(entry);
    if text.chars().count() > TITLE_PREVIEW_CHARS {
        let preview: String = text.chars().take(TITLE_PREVIEW_CHARS).collect();
        Ok(Some(format!("{preview}...")))
    } else {
        Ok(Some(text))
    }
}

fn content_from_precise_region(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    let Some(region) = resolve(ctx, content_by_precise_path(ctx)?) else {
        return Ok(None);
    };
    if visible_text(region).is_empty() {
        return Ok(None);
    }
    Ok(Some(region.inner_html().trim().to_string()))
}

/// Same region, but every text node, hidden ones included.
fn content_from_text_nodes(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    let Some(region) = resolve(ctx, content_by_precise_path(ctx)?) else {
        return Ok(None);
    };
    let pieces: Vec<&str> = region
        .text()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .collect();
    Ok(Some(pieces.join("\n")))
}

fn content_from_overlay_region(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    let Some(region) = resolve(ctx, content_by_overlay_region(ctx)?) else {
        return Ok(None);
    };
    if visible_text(region).is_empty() {
        return Ok(None);
    }
    Ok(Some(region.inner_html().trim().to_string()))
}

/// Overlay text with headings removed, else everything it shows.
fn content_from_overlay_body(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    let Some(overlay) = ctx.overlay() else {
        return Ok(None);
    };
    let without_headings = collect_text(overlay, &|el| is_hidden(el) || is_heading(el) || is_button(el));
    if !without_headings.is_empty() {
        return Ok(Some(without_headings));
    }
    Ok(Some(element_text(overlay)))
}

fn content_from_entry_text(ctx: &ProbeContext<'_>) -> Result<Option<String>, ProbeError> {
    Ok(ctx.scope.map(element_text))
}

pub(crate) fn visible_text(element: ElementRef<'_>) -> String {
    collect_text(element, &is_hidden)
}

fn collect_text(element: ElementRef<'_>, skip: &dyn Fn(&Element) -> bool) -> String {
    let mut raw = String::new();
    for child in element.children() {
        walk_text(child, skip, &mut raw);
    }
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn walk_text(node: NodeRef<'_, Node>, skip: &dyn Fn(&Element) -> bool, out: &mut String) {
    match node.value() {
        Node::Text(text) => {
            out.push_str(text);
            out.push(' ');
        }
        Node::Element(element) if skip(element) => {}
        _ => {
            for child in node.children() {
                walk_text(child, skip, out);
            }
        }
    }
}

fn is_hidden(element: &Element) -> bool {
    if matches!(
        element.name(),
        "script" | "style" | "noscript" | "template"
    ) {
        return true;
    }
    let style_hides = element.attr("style").is_some_and(|style| {
        let compact: String = style.chars().filter(|c| !c.is_whitespace()).collect();
        compact.contains("display:none") || compact.contains("visibility:hidden")
    });
    element.attr("hidden").is_some() || element.attr("aria-hidden") == Some("true") || style_hides
}

fn is_heading(element: &Element) -> bool {
    matches!(
        element.name(),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" | "header"
    ) || element.attr("role") == Some("heading")
}

fn is_button(element: &Element) -> bool {
    element.name() == "button" || element.attr("role") == Some("button")
}
