//! Page detection and the debounced mutation signal that re-runs it.

use std::fmt::Write;
use std::time::{Duration, Instant};

use kb_logging::kb_trace;
use scraper::Html;
use sha2::{Digest, Sha256};
use url::Url;

use crate::locator::select_doc;
use crate::{DetectionRules, NodePath};

/// Where the export trigger belongs on this page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerPlacement {
    /// Next to a recognised host control.
    Adjacent(NodePath),
    /// Fixed-position control; no anchor was found.
    Floating,
}

/// Whether the page looks like a knowledge-base view: a route match, a
/// structural marker, or a `<title>` keyword is enough.
pub fn is_knowledge_page(url: &str, doc: &Html, rules: &DetectionRules) -> bool {
    let path = Url::parse(url)
        .map(|parsed| parsed.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    if rules
        .route_fragments
        .iter()
        .any(|fragment| path.contains(fragment.as_str()))
    {
        kb_trace!("Route {} matches knowledge pattern", path);
        return true;
    }

    let has_marker = rules
        .markers
        .iter()
        .any(|raw| select_doc(doc, raw).is_ok_and(|found| !found.is_empty()));
    if has_marker {
        kb_trace!("Structural knowledge marker present");
        return true;
    }

    let title = select_doc(doc, "title")
        .ok()
        .and_then(|found| found.into_iter().next())
        .map(|el| el.text().collect::<String>().to_lowercase())
        .unwrap_or_default();
    rules
        .title_keywords
        .iter()
        .any(|keyword| title.contains(&keyword.to_lowercase()))
}

pub fn plan_trigger(doc: &Html, rules: &DetectionRules) -> TriggerPlacement {
    rules
        .anchor_controls
        .iter()
        .find_map(|raw| select_doc(doc, raw).ok()?.into_iter().next())
        .map(|anchor| TriggerPlacement::Adjacent(NodePath::of(anchor)))
        .unwrap_or(TriggerPlacement::Floating)
}

/// Detection over a raw snapshot: where the trigger goes, or `None` when
/// the page is not a knowledge view.
pub fn evaluate_page(url: &str, markup: &str, rules: &DetectionRules) -> Option<TriggerPlacement> {
    let doc = Html::parse_document(markup);
    is_knowledge_page(url, &doc, rules).then(|| plan_trigger(&doc, rules))
}

/// Short content hash, used to notice that the page changed between samples.
pub fn page_fingerprint(markup: &str) -> String {
    let digest = Sha256::digest(markup.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

/// Coalesces bursts of mutation signals into one firing per quiet window.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_signal: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_signal: None,
        }
    }

    /// Record a mutation. Restarts the quiet window.
    pub fn signal(&mut self, now: Instant) {
        self.last_signal = Some(now);
    }

    /// `true` exactly once after the window has passed with no new signal.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.last_signal {
            Some(at) if now.saturating_duration_since(at) >= self.window => {
                self.last_signal = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.last_signal.is_some()
    }
}
