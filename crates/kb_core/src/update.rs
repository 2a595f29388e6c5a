use kb_logging::{kb_debug, kb_error, kb_info, kb_warn};

use crate::{BatchPhase, BatchState, DiscoveryChain, Effect, FailureKind, Msg};

/// Pure update function: applies a message to state and returns any effects.
///
/// One overlay at a time: every `OpenEntry` is followed by exactly one
/// `CloseOverlay` for the same index before the next entry is opened.
pub fn update(mut state: BatchState, msg: Msg) -> (BatchState, Vec<Effect>) {
    let effects = match msg {
        Msg::ExportRequested => {
            if !state.phase().accepts_request() {
                kb_debug!("Export requested while {:?}; ignored", state.phase());
                return (state, Vec::new());
            }
            state.begin();
            vec![Effect::DiscoverEntries {
                chain: DiscoveryChain::Primary,
            }]
        }
        Msg::EntriesDiscovered { chain, count } => {
            if state.phase() != &BatchPhase::Discovering(chain) {
                return (state, Vec::new());
            }
            if count > 0 {
                kb_info!("Discovered {} entries via {:?} chain", count, chain);
                state.set_entry_count(count);
                state.set_phase(BatchPhase::ExtractingItem(0));
                vec![Effect::OpenEntry { index: 0 }]
            } else {
                match chain {
                    DiscoveryChain::Primary => {
                        kb_debug!("Primary discovery found nothing; trying structural chain");
                        state.set_phase(BatchPhase::Discovering(DiscoveryChain::Structural));
                        vec![Effect::DiscoverEntries {
                            chain: DiscoveryChain::Structural,
                        }]
                    }
                    DiscoveryChain::Structural => fail(&mut state, FailureKind::NoDocumentsFound),
                }
            }
        }
        Msg::ItemOpened { index, outcome } => {
            if !is_current_item(&state, index) {
                return (state, Vec::new());
            }
            if outcome.is_failed() {
                kb_warn!("Could not open entry {}: {:?}", index, outcome);
                state.record_interaction_failure(index);
            }
            vec![Effect::ExtractEntry { index }]
        }
        Msg::ItemExtracted { index, result } => {
            if !is_current_item(&state, index) {
                return (state, Vec::new());
            }
            match result {
                Ok(document) => state.hold_pending(document),
                Err(failure) => {
                    kb_warn!("Dropping entry {}: {}", index, failure.message);
                    state.record_item_failure(index, failure.message);
                }
            }
            vec![Effect::CloseOverlay { index }]
        }
        Msg::OverlayClosed { index, outcome } => {
            if !is_current_item(&state, index) {
                return (state, Vec::new());
            }
            if outcome.is_failed() {
                kb_warn!("Could not close overlay for entry {}: {:?}", index, outcome);
                state.record_interaction_failure(index);
            }
            state.commit_pending();

            let next = index + 1;
            if next < state.entry_count() {
                state.set_phase(BatchPhase::ExtractingItem(next));
                vec![Effect::OpenEntry { index: next }]
            } else {
                state.set_phase(BatchPhase::Aggregating);
                let documents = state.aggregate();
                if documents.is_empty() {
                    fail(&mut state, FailureKind::NoValidDocuments)
                } else {
                    kb_info!(
                        "Handing off {} of {} documents",
                        documents.len(),
                        state.entry_count()
                    );
                    state.set_phase(BatchPhase::Handoff);
                    vec![Effect::Handoff { documents }]
                }
            }
        }
        Msg::PackagingFinished {
            result,
            used_fallback,
        } => {
            if state.phase() != &BatchPhase::Handoff {
                return (state, Vec::new());
            }
            if used_fallback {
                state.record_transport_fallback();
            }
            match result {
                Ok(location) => {
                    let stats = state.stats();
                    let exported = state.view().collected_count;
                    let summary = format!(
                        "Exported {exported} of {discovered} documents to {location}",
                        discovered = stats.discovered,
                    );
                    kb_info!("{}", summary);
                    state.set_summary(summary.clone());
                    state.set_phase(BatchPhase::Completed);
                    vec![Effect::Notify {
                        summary,
                        blocking: false,
                    }]
                }
                Err(message) => fail(&mut state, FailureKind::PackagingFailed(message)),
            }
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn is_current_item(state: &BatchState, index: usize) -> bool {
    state.phase() == &BatchPhase::ExtractingItem(index)
}

fn fail(state: &mut BatchState, kind: FailureKind) -> Vec<Effect> {
    let summary = format!("Export failed: {kind}");
    kb_error!("{}", summary);
    state.set_summary(summary.clone());
    state.set_phase(BatchPhase::Failed(kind));
    vec![Effect::Notify {
        summary,
        blocking: true,
    }]
}
