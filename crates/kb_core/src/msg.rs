use crate::{DiscoveryChain, RawDocument};

/// Result of a best-effort interaction step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Done,
    /// A fallback path was taken (e.g. Escape instead of a close control).
    Fallback,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionFailure {
    pub message: String,
}

impl ExtractionFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
    /// The trigger control or a host message asked for an export.
    ExportRequested,
    /// A locator chain finished scanning the page.
    EntriesDiscovered { chain: DiscoveryChain, count: usize },
    /// The interaction driver tried to open an entry's overlay.
    ItemOpened { index: usize, outcome: StepOutcome },
    /// Title and content extraction finished for an entry.
    ItemExtracted {
        index: usize,
        result: Result<RawDocument, ExtractionFailure>,
    },
    /// The interaction driver released the overlay.
    OverlayClosed { index: usize, outcome: StepOutcome },
    /// The packaging stage finished. `Ok` carries where the archive went;
    /// `used_fallback` is set when the collaborator was unreachable and the
    /// archive was built locally instead.
    PackagingFinished {
        result: Result<String, String>,
        used_fallback: bool,
    },
    /// Leaves the state untouched.
    NoOp,
}
