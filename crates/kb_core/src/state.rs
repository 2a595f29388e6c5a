use crate::view_model::BatchView;
use crate::{DiscoveryChain, FailureKind, RawDocument};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BatchPhase {
    #[default]
    Idle,
    Discovering(DiscoveryChain),
    ExtractingItem(usize),
    Aggregating,
    Handoff,
    Completed,
    Failed(FailureKind),
}

impl BatchPhase {
    /// A new batch may start from here.
    pub fn accepts_request(&self) -> bool {
        matches!(
            self,
            BatchPhase::Idle | BatchPhase::Completed | BatchPhase::Failed(_)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BatchPhase::Completed | BatchPhase::Failed(_))
    }
}

/// Counters for one batch, reset whenever a new batch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchStats {
    pub discovered: usize,
    pub extracted: usize,
    pub failed_items: usize,
    pub interaction_failures: usize,
    pub dropped_blank: usize,
    pub used_local_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchState {
    phase: BatchPhase,
    entry_count: usize,
    pending: Option<RawDocument>,
    collected: Vec<RawDocument>,
    recovered: Vec<FailureKind>,
    stats: BatchStats,
    last_summary: Option<String>,
}

impl BatchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> BatchView {
        BatchView {
            phase: self.phase.clone(),
            entry_count: self.entry_count,
            collected_count: self.collected.len(),
            stats: self.stats,
            recovered: self.recovered.clone(),
            last_summary: self.last_summary.clone(),
        }
    }

    pub fn phase(&self) -> &BatchPhase {
        &self.phase
    }

    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    pub(crate) fn begin(&mut self) {
        *self = Self {
            phase: BatchPhase::Discovering(DiscoveryChain::Primary),
            ..Self::default()
        };
    }

    pub(crate) fn set_phase(&mut self, phase: BatchPhase) {
        self.phase = phase;
    }

    pub(crate) fn set_entry_count(&mut self, count: usize) {
        self.entry_count = count;
        self.stats.discovered = count;
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.entry_count
    }

    pub(crate) fn hold_pending(&mut self, document: RawDocument) {
        self.stats.extracted += 1;
        self.pending = Some(document);
    }

    pub(crate) fn commit_pending(&mut self) {
        if let Some(document) = self.pending.take() {
            self.collected.push(document);
        }
    }

    pub(crate) fn record_item_failure(&mut self, index: usize, message: String) {
        self.stats.failed_items += 1;
        self.recovered
            .push(FailureKind::ItemExtractionFailed { index, message });
    }

    pub(crate) fn record_interaction_failure(&mut self, index: usize) {
        self.stats.interaction_failures += 1;
        self.recovered.push(FailureKind::InteractionFailed { index });
    }

    pub(crate) fn record_transport_fallback(&mut self) {
        self.stats.used_local_fallback = true;
        self.recovered.push(FailureKind::PackagingTransportFailed(
            "packaging collaborator unreachable".to_string(),
        ));
    }

    /// Drops incomplete documents and returns the survivors in discovery order.
    pub(crate) fn aggregate(&mut self) -> Vec<RawDocument> {
        let before = self.collected.len();
        self.collected.retain(RawDocument::is_complete);
        self.stats.dropped_blank = before - self.collected.len();
        self.collected.clone()
    }

    pub(crate) fn set_summary(&mut self, summary: String) {
        self.last_summary = Some(summary);
    }
}
