use crate::RawDocument;

/// Which locator chain a discovery pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryChain {
    Primary,
    Structural,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    DiscoverEntries { chain: DiscoveryChain },
    OpenEntry { index: usize },
    ExtractEntry { index: usize },
    CloseOverlay { index: usize },
    /// Normalize and package the surviving documents, in discovery order.
    Handoff { documents: Vec<RawDocument> },
    /// Report to whoever invoked the batch. `blocking` marks a user-facing notice.
    Notify { summary: String, blocking: bool },
}
