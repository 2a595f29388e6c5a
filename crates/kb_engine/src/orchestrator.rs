use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use kb_core::{
    update, BatchPhase, BatchState, BatchView, DiscoveryChain, Effect, ExtractionFailure,
    FailureKind, Msg, RawDocument, StepOutcome,
};
use kb_logging::{kb_debug, kb_error, kb_info, kb_warn};
use scraper::Html;
use tokio::sync::Mutex;

use crate::extract::Extractor;
use crate::filename::dedupe_filenames;
use crate::interaction::InteractionDriver;
use crate::locator::{element_text, inspect, locate_with, Purpose};
use crate::normalize::normalize;
use crate::package::{derive_project_name, Bundle, PackageReceipt, Packager, PackagingError, ZipPackager};
use crate::{
    locate_entries, locate_entries_fallback, DocumentEntry, EngineConfig, NodePath, Page,
    PortableDocument, Selectors,
};

/// User-facing notice raised when a batch ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub summary: String,
    pub blocking: bool,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub view: BatchView,
    /// Normalized documents in discovery order, as handed to packaging.
    pub documents: Vec<PortableDocument>,
    pub archive: Option<PathBuf>,
    pub notice: Option<Notice>,
}

impl BatchReport {
    pub fn succeeded(&self) -> bool {
        self.view.phase == BatchPhase::Completed
    }

    pub fn failure(&self) -> Option<&FailureKind> {
        match &self.view.phase {
            BatchPhase::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Runs export batches against a page, one at a time.
pub struct Harvester {
    config: EngineConfig,
    packager: Arc<dyn Packager>,
    local: ZipPackager,
    state: Mutex<BatchState>,
}

impl Harvester {
    /// `packager` is tried first; on a transport failure the archive is
    /// built locally in the configured output directory instead.
    pub fn new(config: EngineConfig, packager: Arc<dyn Packager>) -> Self {
        let local = ZipPackager::new(config.settings.output_dir.clone());
        Self {
            config,
            packager,
            local,
            state: Mutex::new(BatchState::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one export batch to completion. Returns `None` without touching
    /// the page when another batch is still in flight.
    pub async fn run(&self, page: &dyn Page) -> Option<BatchReport> {
        let Ok(mut slot) = self.state.try_lock() else {
            kb_warn!("Export requested while a batch is running; ignored");
            return None;
        };

        let mut runner = EffectRunner::new(self, page);
        let (mut state, effects) = update(std::mem::take(&mut *slot), Msg::ExportRequested);
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            let Some(msg) = runner.execute(effect).await else {
                continue;
            };
            let (next, effects) = update(state, msg);
            state = next;
            queue.extend(effects);
        }

        let report = BatchReport {
            view: state.view(),
            documents: runner.documents,
            archive: runner.archive,
            notice: runner.notice,
        };
        *slot = state;
        Some(report)
    }
}

/// Executes core effects against the page for a single batch.
struct EffectRunner<'h> {
    harvester: &'h Harvester,
    page: &'h dyn Page,
    driver: InteractionDriver<'h>,
    extractor: Extractor<'h>,
    chain: DiscoveryChain,
    entries: Vec<Located>,
    current: Option<DocumentEntry>,
    open_failure: Option<String>,
    documents: Vec<PortableDocument>,
    archive: Option<PathBuf>,
    notice: Option<Notice>,
}

impl<'h> EffectRunner<'h> {
    fn new(harvester: &'h Harvester, page: &'h dyn Page) -> Self {
        let settings = &harvester.config.settings;
        Self {
            harvester,
            page,
            driver: InteractionDriver::new(page, &settings.selectors, settings.timings),
            extractor: Extractor::new(
                page,
                &settings.selectors,
                settings.timings,
                harvester.config.now_utc.clone(),
            ),
            chain: DiscoveryChain::Primary,
            entries: Vec::new(),
            current: None,
            open_failure: None,
            documents: Vec::new(),
            archive: None,
            notice: None,
        }
    }

    fn selectors(&self) -> &'h Selectors {
        &self.harvester.config.settings.selectors
    }

    async fn execute(&mut self, effect: Effect) -> Option<Msg> {
        match effect {
            Effect::DiscoverEntries { chain } => {
                self.chain = chain;
                self.entries = self.discover(chain).await;
                Some(Msg::EntriesDiscovered {
                    chain,
                    count: self.entries.len(),
                })
            }
            Effect::OpenEntry { index } => {
                let outcome = self.open_entry(index).await;
                self.open_failure = match &outcome {
                    StepOutcome::Failed(message) => Some(message.clone()),
                    _ => None,
                };
                Some(Msg::ItemOpened { index, outcome })
            }
            Effect::ExtractEntry { index } => Some(Msg::ItemExtracted {
                index,
                result: self.extract_entry(index).await,
            }),
            Effect::CloseOverlay { index } => {
                let outcome = self.driver.close().await;
                self.current = None;
                Some(Msg::OverlayClosed { index, outcome })
            }
            Effect::Handoff { documents } => {
                let (result, used_fallback) = self.hand_off(&documents).await;
                Some(Msg::PackagingFinished {
                    result,
                    used_fallback,
                })
            }
            Effect::Notify { summary, blocking } => {
                if blocking {
                    kb_error!("Notice: {}", summary);
                } else {
                    kb_info!("Notice: {}", summary);
                }
                self.notice = Some(Notice { summary, blocking });
                None
            }
        }
    }

    async fn discover(&self, chain: DiscoveryChain) -> Vec<Located> {
        match self.page.content().await {
            Ok(markup) => discover_in(&markup, self.selectors(), chain),
            Err(err) => {
                kb_warn!("Page unreadable during {:?} discovery: {}", chain, err);
                Vec::new()
            }
        }
    }

    /// Re-resolve the entry against the current page, then open it.
    async fn open_entry(&mut self, index: usize) -> StepOutcome {
        let Some(node) = self.resolve_entry(index).await else {
            kb_warn!("Entry {} could not be found again", index);
            self.current = None;
            return StepOutcome::Failed(format!("entry {index} is no longer present"));
        };
        let entry = DocumentEntry { node, index };
        let outcome = self.driver.open(&entry).await;
        self.current = Some(entry);
        outcome
    }

    /// The stored path if it still leads to the same entry, else the entry
    /// with the same text on a fresh run of the chain, nearest its old position.
    async fn resolve_entry(&mut self, index: usize) -> Option<NodePath> {
        let stored = self.entries.get(index)?.clone();
        let markup = match self.page.content().await {
            Ok(markup) => markup,
            Err(err) => {
                kb_warn!("Page unreadable before entry {}: {}", index, err);
                return None;
            }
        };
        if text_at(&markup, &stored.path).as_deref() == Some(stored.text.as_str()) {
            return Some(stored.path);
        }
        kb_debug!("Entry {} moved; rediscovering", index);
        // Later entries keep their own recorded text and heal the same way.
        let found = discover_in(&markup, self.selectors(), self.chain)
            .into_iter()
            .enumerate()
            .filter(|(_, candidate)| candidate.text == stored.text)
            .min_by_key(|(position, _)| position.abs_diff(index))
            .map(|(_, candidate)| candidate.path);
        match (&found, self.entries.get_mut(index)) {
            (Some(path), Some(entry)) => entry.path = path.clone(),
            _ => kb_warn!("Entry {} ({:?}) vanished from the page", index, stored.text),
        }
        found
    }

    async fn extract_entry(&mut self, index: usize) -> Result<RawDocument, ExtractionFailure> {
        if let Some(message) = self.open_failure.take() {
            return Err(ExtractionFailure::new(format!(
                "overlay did not open: {message}"
            )));
        }
        let Some(entry) = self.current.clone() else {
            return Err(ExtractionFailure::new(format!(
                "entry {index} is no longer present"
            )));
        };
        let title = self.extractor.extract_title(&entry).await;
        let content = self.extractor.extract_content(&entry).await;
        kb_debug!(
            "Entry {} extracted: {:?} ({} chars)",
            index,
            title,
            content.chars().count()
        );
        Ok(RawDocument::new(title, content))
    }

    async fn hand_off(&mut self, documents: &[RawDocument]) -> (Result<String, String>, bool) {
        let now = self.harvester.config.now();
        let portable = dedupe_filenames(documents.iter().map(|raw| normalize(raw, now)).collect());
        let bundle = Bundle {
            project_name: self.project_name().await,
            date: now.date_naive(),
            documents: portable,
        };
        self.documents = bundle.documents.clone();

        let (delivered, used_fallback) = match self.harvester.packager.deliver(&bundle).await {
            Err(PackagingError::Transport(message)) => {
                kb_warn!("Packaging collaborator unreachable ({}); packaging locally", message);
                (self.harvester.local.deliver(&bundle).await, true)
            }
            other => (other, false),
        };

        let result = match delivered {
            Ok(PackageReceipt { path, .. }) => {
                let location = path.display().to_string();
                self.archive = Some(path);
                Ok(location)
            }
            Err(err) => Err(err.to_string()),
        };
        (result, used_fallback)
    }

    async fn project_name(&self) -> String {
        let heading = match self.page.content().await {
            Ok(markup) => project_heading(&markup, self.selectors()),
            Err(_) => None,
        };
        let url = self.page.url().await.unwrap_or_default();
        derive_project_name(heading.as_deref(), &url)
    }
}

/// A discovered entry and the text it showed at discovery time.
#[derive(Debug, Clone)]
struct Located {
    path: NodePath,
    text: String,
}

fn discover_in(markup: &str, selectors: &Selectors, chain: DiscoveryChain) -> Vec<Located> {
    let doc = Html::parse_document(markup);
    let paths = match chain {
        DiscoveryChain::Primary => locate_entries(&doc, selectors),
        DiscoveryChain::Structural => locate_entries_fallback(&doc, selectors),
    };
    paths
        .into_iter()
        .filter_map(|path| {
            let text = element_text(path.resolve(&doc)?);
            Some(Located { path, text })
        })
        .collect()
}

fn text_at(markup: &str, path: &NodePath) -> Option<String> {
    path.resolve(&Html::parse_document(markup)).map(element_text)
}

fn project_heading(markup: &str, selectors: &Selectors) -> Option<String> {
    inspect(markup, selectors, None, |ctx| {
        locate_with(ctx, Purpose::ProjectHeading)
            .and_then(|path| path.resolve(ctx.doc))
            .map(element_text)
    })
}
