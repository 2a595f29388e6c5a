use crate::{BatchPhase, BatchStats, FailureKind};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BatchView {
    pub phase: BatchPhase,
    pub entry_count: usize,
    pub collected_count: usize,
    pub stats: BatchStats,
    /// Failures that were recovered locally without ending the batch.
    pub recovered: Vec<FailureKind>,
    pub last_summary: Option<String>,
}
