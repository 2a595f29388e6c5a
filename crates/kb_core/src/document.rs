/// Title and content pulled out of one opened overlay, before normalization.
///
/// Content may still carry residual markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub title: String,
    pub content: String,
}

impl RawDocument {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }

    /// Both fields carry something other than whitespace.
    pub fn is_complete(&self) -> bool {
        !self.title.trim().is_empty() && !self.content.trim().is_empty()
    }
}

/// Failure taxonomy for one batch. Only the fatal kinds end a batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureKind {
    #[error("no documents found on this page")]
    NoDocumentsFound,
    #[error("no valid documents could be extracted")]
    NoValidDocuments,
    #[error("extraction failed for item {index}: {message}")]
    ItemExtractionFailed { index: usize, message: String },
    #[error("interaction failed for item {index}")]
    InteractionFailed { index: usize },
    #[error("packaging transport failed: {0}")]
    PackagingTransportFailed(String),
    #[error("packaging failed: {0}")]
    PackagingFailed(String),
}

impl FailureKind {
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FailureKind::NoDocumentsFound
                | FailureKind::NoValidDocuments
                | FailureKind::PackagingFailed(_)
        )
    }
}
