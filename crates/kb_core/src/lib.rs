//! Harvester core: pure batch state machine and the shared document model.
mod document;
mod effect;
mod msg;
mod state;
mod update;
mod view_model;

pub use document::{FailureKind, RawDocument};
pub use effect::{DiscoveryChain, Effect};
pub use msg::{ExtractionFailure, Msg, StepOutcome};
pub use state::{BatchPhase, BatchState, BatchStats};
pub use update::update;
pub use view_model::BatchView;
