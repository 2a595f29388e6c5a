//! Ranked strategy chains over a page snapshot.
//!
//! Every chain is a plain ordered list of probes. The first probe that yields
//! a non-empty result wins; a probe error counts as "not found" and the chain
//! moves on. Probes only read the snapshot.

use kb_logging::{kb_debug, kb_trace};
use scraper::{ElementRef, Html, Selector};

use crate::{NodePath, Selectors};

const ENTRY_TEXT_CHARS: std::ops::RangeInclusive<usize> = 3..=500;
const ENTRY_MAX_CHILDREN: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
    #[error("scope node is no longer present")]
    DetachedScope,
}

/// What a single-node lookup is for. Each purpose has its own chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purpose {
    Overlay,
    Title,
    Content,
    OpenTrigger,
    CloseControl,
    ProjectHeading,
}

/// Read-only view handed to every probe.
pub struct ProbeContext<'a> {
    pub doc: &'a Html,
    pub scope: Option<ElementRef<'a>>,
    pub selectors: &'a Selectors,
}

impl<'a> ProbeContext<'a> {
    pub fn new(doc: &'a Html, selectors: &'a Selectors) -> Self {
        Self {
            doc,
            scope: None,
            selectors,
        }
    }

    /// Scope the context to the element at `path`, if it still resolves.
    pub fn scoped(mut self, path: Option<&NodePath>) -> Self {
        let doc = self.doc;
        self.scope = path.and_then(|p| p.resolve(doc));
        self
    }

    pub fn overlay(&self) -> Option<ElementRef<'a>> {
        self.selectors
            .overlay
            .iter()
            .find_map(|raw| select_doc(self.doc, raw).ok()?.into_iter().last())
    }

    pub fn main_region(&self) -> Option<ElementRef<'a>> {
        first_in_doc(self.doc, &self.selectors.main_region)
    }

    fn require_scope(&self) -> Result<ElementRef<'a>, ProbeError> {
        self.scope.ok_or(ProbeError::DetachedScope)
    }
}

pub type Probe<T> = fn(&ProbeContext<'_>) -> Result<Option<T>, ProbeError>;

pub struct Strategy<T> {
    pub name: &'static str,
    pub probe: Probe<T>,
}

/// Absence test for probe results: empty lists and blank strings count as "not found".
pub trait ProbeOutput {
    fn is_empty_output(&self) -> bool;
}

impl ProbeOutput for Vec<NodePath> {
    fn is_empty_output(&self) -> bool {
        self.is_empty()
    }
}

impl ProbeOutput for NodePath {
    fn is_empty_output(&self) -> bool {
        false
    }
}

impl ProbeOutput for String {
    fn is_empty_output(&self) -> bool {
        self.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHit<T> {
    pub strategy: &'static str,
    pub value: T,
}

pub fn run_chain<T: ProbeOutput>(
    chain: &[Strategy<T>],
    ctx: &ProbeContext<'_>,
) -> Option<ChainHit<T>> {
    chain.iter().find_map(|strategy| {
        try_strategy(strategy, ctx).map(|value| ChainHit {
            strategy: strategy.name,
            value,
        })
    })
}

pub(crate) fn try_strategy<T: ProbeOutput>(
    strategy: &Strategy<T>,
    ctx: &ProbeContext<'_>,
) -> Option<T> {
    match (strategy.probe)(ctx) {
        Ok(Some(value)) if !value.is_empty_output() => {
            kb_trace!("Strategy {} matched", strategy.name);
            Some(value)
        }
        Ok(_) => None,
        Err(err) => {
            kb_debug!("Strategy {} failed: {}", strategy.name, err);
            None
        }
    }
}

const ENTRY_CHAIN: &[Strategy<Vec<NodePath>>] = &[
    Strategy {
        name: "entries/precise-path",
        probe: entries_by_precise_path,
    },
    Strategy {
        name: "entries/semantic",
        probe: entries_by_semantic_attributes,
    },
    Strategy {
        name: "entries/generic-tag",
        probe: entries_by_generic_tags,
    },
    Strategy {
        name: "entries/sibling-heuristic",
        probe: entries_by_sibling_heuristic,
    },
];

const STRUCTURAL_ENTRY_CHAIN: &[Strategy<Vec<NodePath>>] = &[
    Strategy {
        name: "entries/class-fragment",
        probe: entries_by_class_fragment,
    },
    Strategy {
        name: "entries/loose-siblings",
        probe: entries_by_loose_siblings,
    },
];

const OVERLAY_CHAIN: &[Strategy<NodePath>] = &[Strategy {
    name: "overlay/selectors",
    probe: overlay_node,
}];

const TITLE_CHAIN: &[Strategy<NodePath>] = &[
    Strategy {
        name: "title/precise-path",
        probe: title_by_precise_path,
    },
    Strategy {
        name: "title/overlay-heading",
        probe: title_by_overlay_heading,
    },
];

const CONTENT_CHAIN: &[Strategy<NodePath>] = &[
    Strategy {
        name: "content/precise-path",
        probe: content_by_precise_path,
    },
    Strategy {
        name: "content/overlay-region",
        probe: content_by_overlay_region,
    },
];

const OPEN_TRIGGER_CHAIN: &[Strategy<NodePath>] = &[
    Strategy {
        name: "trigger/labelled-control",
        probe: trigger_by_label,
    },
    Strategy {
        name: "trigger/first-control",
        probe: trigger_first_control,
    },
    Strategy {
        name: "trigger/entry",
        probe: trigger_entry_itself,
    },
];

const CLOSE_CHAIN: &[Strategy<NodePath>] = &[
    Strategy {
        name: "close/selectors",
        probe: close_by_selectors,
    },
    Strategy {
        name: "close/labelled-control",
        probe: close_by_label,
    },
];

const PROJECT_HEADING_CHAIN: &[Strategy<NodePath>] = &[Strategy {
    name: "project/heading",
    probe: project_heading,
}];

/// Primary discovery: ordered document entries, possibly empty.
pub fn locate_entries(doc: &Html, selectors: &Selectors) -> Vec<NodePath> {
    discover(ENTRY_CHAIN, doc, selectors)
}

/// Secondary, structure-only discovery used when the primary chain finds nothing.
pub fn locate_entries_fallback(doc: &Html, selectors: &Selectors) -> Vec<NodePath> {
    discover(STRUCTURAL_ENTRY_CHAIN, doc, selectors)
}

fn discover(
    chain: &[Strategy<Vec<NodePath>>],
    doc: &Html,
    selectors: &Selectors,
) -> Vec<NodePath> {
    let ctx = ProbeContext::new(doc, selectors);
    match run_chain(chain, &ctx) {
        Some(hit) => {
            kb_debug!("{} found {} entries", hit.strategy, hit.value.len());
            outermost(hit.value)
        }
        None => Vec::new(),
    }
}

/// Single-node lookup for `purpose`, optionally scoped to an entry node.
pub fn locate_single(
    doc: &Html,
    selectors: &Selectors,
    scope: Option<&NodePath>,
    purpose: Purpose,
) -> Option<NodePath> {
    let ctx = ProbeContext::new(doc, selectors).scoped(scope);
    locate_with(&ctx, purpose)
}

pub(crate) fn locate_with(ctx: &ProbeContext<'_>, purpose: Purpose) -> Option<NodePath> {
    let chain = match purpose {
        Purpose::Overlay => OVERLAY_CHAIN,
        Purpose::Title => TITLE_CHAIN,
        Purpose::Content => CONTENT_CHAIN,
        Purpose::OpenTrigger => OPEN_TRIGGER_CHAIN,
        Purpose::CloseControl => CLOSE_CHAIN,
        Purpose::ProjectHeading => PROJECT_HEADING_CHAIN,
    };
    run_chain(chain, ctx).map(|hit| hit.value)
}

/// Parse `markup` and run `f` against it, optionally scoped to `scope`.
///
/// The parsed tree never outlives the call, so async callers can hold the
/// result across suspension points.
pub(crate) fn inspect<T>(
    markup: &str,
    selectors: &Selectors,
    scope: Option<&NodePath>,
    f: impl FnOnce(&ProbeContext<'_>) -> T,
) -> T {
    let doc = Html::parse_document(markup);
    let ctx = ProbeContext::new(&doc, selectors).scoped(scope);
    f(&ctx)
}

fn entries_by_precise_path(ctx: &ProbeContext<'_>) -> Result<Option<Vec<NodePath>>, ProbeError> {
    let found = select_doc(ctx.doc, &ctx.selectors.entries_precise)?;
    Ok(Some(paths(found)))
}

fn entries_by_semantic_attributes(
    ctx: &ProbeContext<'_>,
) -> Result<Option<Vec<NodePath>>, ProbeError> {
    Ok(first_nonempty_in_doc(ctx.doc, &ctx.selectors.entries_semantic).map(paths))
}

fn entries_by_generic_tags(ctx: &ProbeContext<'_>) -> Result<Option<Vec<NodePath>>, ProbeError> {
    Ok(first_nonempty_in_doc(ctx.doc, &ctx.selectors.entries_generic).map(paths))
}

fn entries_by_class_fragment(ctx: &ProbeContext<'_>) -> Result<Option<Vec<NodePath>>, ProbeError> {
    Ok(first_nonempty_in_doc(ctx.doc, &ctx.selectors.entries_structural).map(paths))
}

fn entries_by_sibling_heuristic(
    ctx: &ProbeContext<'_>,
) -> Result<Option<Vec<NodePath>>, ProbeError> {
    let controls = parse_all(&ctx.selectors.controls);
    Ok(largest_sibling_group(ctx, |member| {
        let text_chars = element_text(member).chars().count();
        let children = member.children().filter_map(ElementRef::wrap).count();
        ENTRY_TEXT_CHARS.contains(&text_chars)
            && children <= ENTRY_MAX_CHILDREN
            && has_affordance(member, &controls)
    }))
}

fn entries_by_loose_siblings(ctx: &ProbeContext<'_>) -> Result<Option<Vec<NodePath>>, ProbeError> {
    let controls = parse_all(&ctx.selectors.controls);
    Ok(largest_sibling_group(ctx, |member| {
        has_affordance(member, &controls)
    }))
}

/// Largest group of same-tag, same-class siblings (at least two) under the
/// main region whose every member satisfies `qualifies`.
fn largest_sibling_group<'a>(
    ctx: &ProbeContext<'a>,
    qualifies: impl Fn(ElementRef<'a>) -> bool,
) -> Option<Vec<NodePath>> {
    let region = ctx.main_region()?;
    let mut best: Option<Vec<ElementRef<'a>>> = None;
    for parent in region.descendants().filter_map(ElementRef::wrap) {
        for group in homogeneous_groups(parent) {
            let larger = best.as_ref().map_or(true, |b| group.len() > b.len());
            if larger && group.iter().all(|member| qualifies(*member)) {
                best = Some(group);
            }
        }
    }
    best.map(paths)
}

fn homogeneous_groups<'a>(parent: ElementRef<'a>) -> Vec<Vec<ElementRef<'a>>> {
    let mut groups: Vec<((&'a str, Option<&'a str>), Vec<ElementRef<'a>>)> = Vec::new();
    for child in parent.children().filter_map(ElementRef::wrap) {
        let key = (child.value().name(), child.value().attr("class"));
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, members)) => members.push(child),
            None => groups.push((key, vec![child])),
        }
    }
    groups
        .into_iter()
        .map(|(_, members)| members)
        .filter(|members| members.len() >= 2)
        .collect()
}

fn has_affordance(element: ElementRef<'_>, controls: &[Selector]) -> bool {
    let attrs = element.value();
    let self_clickable = attrs.attr("tabindex").is_some()
        || attrs.attr("onclick").is_some()
        || attrs.attr("role") == Some("button");
    self_clickable
        || element
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .any(|d| controls.iter().any(|sel| sel.matches(&d)))
}

fn overlay_node(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    Ok(ctx.overlay().map(NodePath::of))
}

pub(crate) fn title_by_precise_path(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let found = select_doc(ctx.doc, &ctx.selectors.overlay_title_precise)?;
    Ok(found
        .into_iter()
        .find(|el| !element_text(*el).is_empty())
        .map(NodePath::of))
}

pub(crate) fn title_by_overlay_heading(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let Some(overlay) = ctx.overlay() else {
        return Ok(None);
    };
    Ok(ctx.selectors.overlay_title.iter().find_map(|raw| {
        select_within(overlay, raw)
            .ok()?
            .into_iter()
            .find(|el| !element_text(*el).is_empty())
            .map(NodePath::of)
    }))
}

pub(crate) fn content_by_precise_path(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let found = select_doc(ctx.doc, &ctx.selectors.overlay_content_precise)?;
    Ok(found.into_iter().next().map(NodePath::of))
}

pub(crate) fn content_by_overlay_region(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let Some(overlay) = ctx.overlay() else {
        return Ok(None);
    };
    Ok(ctx.selectors.overlay_content.iter().find_map(|raw| {
        select_within(overlay, raw)
            .ok()?
            .into_iter()
            .next()
            .map(NodePath::of)
    }))
}

fn trigger_by_label(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let entry = ctx.require_scope()?;
    let vocabulary = &ctx.selectors.open_vocabulary;
    Ok(controls_within(entry, &ctx.selectors.controls)
        .into_iter()
        .find(|control| matches_vocabulary(&control_label(*control), vocabulary))
        .map(NodePath::of))
}

fn trigger_first_control(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let entry = ctx.require_scope()?;
    Ok(controls_within(entry, &ctx.selectors.controls)
        .into_iter()
        .next()
        .map(NodePath::of))
}

fn trigger_entry_itself(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    Ok(Some(NodePath::of(ctx.require_scope()?)))
}

/// Only controls inside the overlay count; page-level "Close" buttons belong to the host.
fn close_by_selectors(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let Some(overlay) = ctx.overlay() else {
        return Ok(None);
    };
    Ok(first_nonempty_within(overlay, &ctx.selectors.close_controls)
        .and_then(|els| els.into_iter().next())
        .map(NodePath::of))
}

fn close_by_label(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    let Some(overlay) = ctx.overlay() else {
        return Ok(None);
    };
    let vocabulary = &ctx.selectors.close_vocabulary;
    Ok(controls_within(overlay, &ctx.selectors.controls)
        .into_iter()
        .find(|control| matches_vocabulary(&control_label(*control), vocabulary))
        .map(NodePath::of))
}

fn project_heading(ctx: &ProbeContext<'_>) -> Result<Option<NodePath>, ProbeError> {
    Ok(ctx.selectors.project_heading.iter().find_map(|raw| {
        select_doc(ctx.doc, raw)
            .ok()?
            .into_iter()
            .find(|el| !element_text(*el).is_empty())
            .map(NodePath::of)
    }))
}

pub(crate) fn parse_selector(raw: &str) -> Result<Selector, ProbeError> {
    Selector::parse(raw).map_err(|err| ProbeError::InvalidSelector {
        selector: raw.to_string(),
        message: format!("{err:?}"),
    })
}

fn parse_all(raws: &[String]) -> Vec<Selector> {
    raws.iter()
        .filter_map(|raw| match parse_selector(raw) {
            Ok(selector) => Some(selector),
            Err(err) => {
                kb_debug!("Skipping selector: {}", err);
                None
            }
        })
        .collect()
}

pub(crate) fn select_doc<'a>(doc: &'a Html, raw: &str) -> Result<Vec<ElementRef<'a>>, ProbeError> {
    let selector = parse_selector(raw)?;
    Ok(doc.select(&selector).collect())
}

pub(crate) fn select_within<'a>(
    scope: ElementRef<'a>,
    raw: &str,
) -> Result<Vec<ElementRef<'a>>, ProbeError> {
    let selector = parse_selector(raw)?;
    Ok(scope.select(&selector).collect())
}

fn first_in_doc<'a>(doc: &'a Html, raws: &[String]) -> Option<ElementRef<'a>> {
    first_nonempty_in_doc(doc, raws).and_then(|els| els.into_iter().next())
}

fn first_nonempty_in_doc<'a>(doc: &'a Html, raws: &[String]) -> Option<Vec<ElementRef<'a>>> {
    raws.iter().find_map(|raw| match select_doc(doc, raw) {
        Ok(found) if !found.is_empty() => Some(found),
        Ok(_) => None,
        Err(err) => {
            kb_debug!("Skipping selector: {}", err);
            None
        }
    })
}

fn first_nonempty_within<'a>(scope: ElementRef<'a>, raws: &[String]) -> Option<Vec<ElementRef<'a>>> {
    raws.iter().find_map(|raw| match select_within(scope, raw) {
        Ok(found) if !found.is_empty() => Some(found),
        Ok(_) => None,
        Err(err) => {
            kb_debug!("Skipping selector: {}", err);
            None
        }
    })
}

/// Every control under `scope` in document order, matched by any control selector.
pub(crate) fn controls_within<'a>(scope: ElementRef<'a>, raws: &[String]) -> Vec<ElementRef<'a>> {
    let selectors = parse_all(raws);
    scope
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| selectors.iter().any(|sel| sel.matches(el)))
        .collect()
}

/// Visible label of a control: its text plus `aria-label` and `title`, lowercased.
pub(crate) fn control_label(control: ElementRef<'_>) -> String {
    let mut label = element_text(control);
    for attr in ["aria-label", "title"] {
        if let Some(value) = control.value().attr(attr) {
            label.push(' ');
            label.push_str(value);
        }
    }
    label.to_lowercase()
}

pub(crate) fn matches_vocabulary(label: &str, vocabulary: &[String]) -> bool {
    let words: Vec<&str> = label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    vocabulary.iter().any(|term| {
        let term = term.to_lowercase();
        if term.chars().all(char::is_alphanumeric) {
            words.iter().any(|w| *w == term)
        } else {
            label.contains(&term)
        }
    })
}

/// Whitespace-collapsed text of an element and its descendants.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn paths(elements: Vec<ElementRef<'_>>) -> Vec<NodePath> {
    elements.into_iter().map(NodePath::of).collect()
}

/// Drops entries nested inside another entry, keeping discovery order.
fn outermost(found: Vec<NodePath>) -> Vec<NodePath> {
    found
        .iter()
        .filter(|path| {
            !found
                .iter()
                .any(|other| other != *path && other.contains(path))
        })
        .cloned()
        .collect()
}
