use std::sync::Once;

use kb_core::{
    update, BatchPhase, BatchState, BatchView, DiscoveryChain, Effect, ExtractionFailure,
    FailureKind, Msg, RawDocument, StepOutcome,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(kb_logging::initialize_for_tests);
}

fn discovered(state: BatchState, count: usize) -> (BatchState, Vec<Effect>) {
    let (state, _) = update(state, Msg::ExportRequested);
    update(
        state,
        Msg::EntriesDiscovered {
            chain: DiscoveryChain::Primary,
            count,
        },
    )
}

/// Drives one item through open/extract/close and returns the close effects.
fn run_item(
    state: BatchState,
    index: usize,
    result: Result<RawDocument, ExtractionFailure>,
) -> (BatchState, Vec<Effect>) {
    let (state, effects) = update(
        state,
        Msg::ItemOpened {
            index,
            outcome: StepOutcome::Done,
        },
    );
    assert_eq!(effects, vec![Effect::ExtractEntry { index }]);
    let (state, effects) = update(state, Msg::ItemExtracted { index, result });
    assert_eq!(effects, vec![Effect::CloseOverlay { index }]);
    update(
        state,
        Msg::OverlayClosed {
            index,
            outcome: StepOutcome::Done,
        },
    )
}

fn doc(title: &str) -> RawDocument {
    RawDocument::new(title, format!("{title} body"))
}

#[test]
fn export_request_starts_primary_discovery() {
    init_logging();
    let (state, effects) = update(BatchState::new(), Msg::ExportRequested);

    assert_eq!(
        effects,
        vec![Effect::DiscoverEntries {
            chain: DiscoveryChain::Primary
        }]
    );
    assert_eq!(
        state.phase(),
        &BatchPhase::Discovering(DiscoveryChain::Primary)
    );
    assert_eq!(
        state.view(),
        BatchView {
            phase: BatchPhase::Discovering(DiscoveryChain::Primary),
            ..BatchView::default()
        }
    );
}

#[test]
fn empty_primary_falls_back_to_structural_chain() {
    init_logging();
    let (state, effects) = discovered(BatchState::new(), 0);

    assert_eq!(
        effects,
        vec![Effect::DiscoverEntries {
            chain: DiscoveryChain::Structural
        }]
    );

    let (state, effects) = update(
        state,
        Msg::EntriesDiscovered {
            chain: DiscoveryChain::Structural,
            count: 2,
        },
    );
    assert_eq!(effects, vec![Effect::OpenEntry { index: 0 }]);
    assert_eq!(state.view().entry_count, 2);
}

#[test]
fn no_entries_anywhere_fails_without_interaction() {
    init_logging();
    let (state, mut all_effects) = discovered(BatchState::new(), 0);
    let (state, effects) = update(
        state,
        Msg::EntriesDiscovered {
            chain: DiscoveryChain::Structural,
            count: 0,
        },
    );
    all_effects.extend(effects.clone());

    assert_eq!(
        state.phase(),
        &BatchPhase::Failed(FailureKind::NoDocumentsFound)
    );
    assert!(matches!(
        effects.as_slice(),
        [Effect::Notify { blocking: true, .. }]
    ));
    assert!(!all_effects.iter().any(|e| matches!(
        e,
        Effect::OpenEntry { .. } | Effect::ExtractEntry { .. } | Effect::CloseOverlay { .. }
    )));
}

#[test]
fn items_are_processed_sequentially_and_handed_off_in_order() {
    init_logging();
    let (state, effects) = discovered(BatchState::new(), 3);
    assert_eq!(effects, vec![Effect::OpenEntry { index: 0 }]);

    let (state, effects) = run_item(state, 0, Ok(doc("a")));
    assert_eq!(effects, vec![Effect::OpenEntry { index: 1 }]);
    let (state, effects) = run_item(state, 1, Ok(doc("b")));
    assert_eq!(effects, vec![Effect::OpenEntry { index: 2 }]);
    let (state, effects) = run_item(state, 2, Ok(doc("c")));

    assert_eq!(
        effects,
        vec![Effect::Handoff {
            documents: vec![doc("a"), doc("b"), doc("c")]
        }]
    );
    assert_eq!(state.phase(), &BatchPhase::Handoff);
}

#[test]
fn failed_extraction_still_closes_overlay_and_drops_item() {
    init_logging();
    let (state, _) = discovered(BatchState::new(), 3);

    let (state, _) = run_item(state, 0, Ok(doc("a")));
    let (state, _) = run_item(state, 1, Err(ExtractionFailure::new("detached node")));
    let (state, effects) = run_item(state, 2, Ok(doc("c")));

    assert_eq!(
        effects,
        vec![Effect::Handoff {
            documents: vec![doc("a"), doc("c")]
        }]
    );
    let view = state.view();
    assert_eq!(view.stats.failed_items, 1);
    assert_eq!(
        view.recovered,
        vec![FailureKind::ItemExtractionFailed {
            index: 1,
            message: "detached node".to_string()
        }]
    );

    let (state, effects) = update(
        state,
        Msg::PackagingFinished {
            result: Ok("kb_2026-01-01.zip".to_string()),
            used_fallback: false,
        },
    );
    assert_eq!(state.phase(), &BatchPhase::Completed);
    assert_eq!(
        effects,
        vec![Effect::Notify {
            summary: "Exported 2 of 3 documents to kb_2026-01-01.zip".to_string(),
            blocking: false,
        }]
    );
}

#[test]
fn blank_documents_are_dropped_during_aggregation() {
    init_logging();
    let (state, _) = discovered(BatchState::new(), 2);
    let (state, _) = run_item(state, 0, Ok(RawDocument::new("t", "   ")));
    let (state, effects) = run_item(state, 1, Ok(RawDocument::new("", "body")));

    assert_eq!(
        state.phase(),
        &BatchPhase::Failed(FailureKind::NoValidDocuments)
    );
    assert!(matches!(
        effects.as_slice(),
        [Effect::Notify { blocking: true, .. }]
    ));
    assert_eq!(state.view().stats.dropped_blank, 2);
}

#[test]
fn open_and_close_failures_are_recovered() {
    init_logging();
    let (state, _) = discovered(BatchState::new(), 1);
    let (state, effects) = update(
        state,
        Msg::ItemOpened {
            index: 0,
            outcome: StepOutcome::Failed("no trigger".to_string()),
        },
    );
    assert_eq!(effects, vec![Effect::ExtractEntry { index: 0 }]);
    let (state, _) = update(
        state,
        Msg::ItemExtracted {
            index: 0,
            result: Ok(doc("a")),
        },
    );
    let (state, effects) = update(
        state,
        Msg::OverlayClosed {
            index: 0,
            outcome: StepOutcome::Fallback,
        },
    );

    assert_eq!(
        effects,
        vec![Effect::Handoff {
            documents: vec![doc("a")]
        }]
    );
    assert_eq!(state.view().stats.interaction_failures, 1);
}

#[test]
fn packaging_failure_is_fatal_and_transport_fallback_is_recorded() {
    init_logging();
    let (state, _) = discovered(BatchState::new(), 1);
    let (state, _) = run_item(state, 0, Ok(doc("a")));

    let (state, effects) = update(
        state,
        Msg::PackagingFinished {
            result: Err("disk full".to_string()),
            used_fallback: true,
        },
    );

    assert_eq!(
        state.phase(),
        &BatchPhase::Failed(FailureKind::PackagingFailed("disk full".to_string()))
    );
    assert!(state.stats().used_local_fallback);
    let recovered = state.view().recovered;
    assert_eq!(recovered.len(), 1);
    assert!(!recovered[0].is_fatal());
    assert_eq!(
        effects,
        vec![Effect::Notify {
            summary: "Export failed: packaging failed: disk full".to_string(),
            blocking: true,
        }]
    );
}

#[test]
fn requests_during_a_batch_are_ignored() {
    init_logging();
    let (state, _) = discovered(BatchState::new(), 2);
    let before = state.clone();

    let (state, effects) = update(state, Msg::ExportRequested);

    assert!(effects.is_empty());
    assert_eq!(state, before);
}

#[test]
fn stale_messages_for_other_items_are_ignored() {
    init_logging();
    let (state, _) = discovered(BatchState::new(), 2);
    let (state, effects) = update(
        state,
        Msg::ItemExtracted {
            index: 1,
            result: Ok(doc("late")),
        },
    );

    assert!(effects.is_empty());
    assert_eq!(state.phase(), &BatchPhase::ExtractingItem(0));
}

#[test]
fn a_finished_batch_can_be_restarted() {
    init_logging();
    let (state, _) = discovered(BatchState::new(), 0);
    let (state, _) = update(
        state,
        Msg::EntriesDiscovered {
            chain: DiscoveryChain::Structural,
            count: 0,
        },
    );
    assert!(state.phase().is_terminal());

    let (state, effects) = update(state, Msg::ExportRequested);
    assert_eq!(
        effects,
        vec![Effect::DiscoverEntries {
            chain: DiscoveryChain::Primary
        }]
    );
    assert_eq!(state.view().stats.discovered, 0);
    assert!(state.view().last_summary.is_none());
}

#[test]
fn noop_leaves_state_untouched() {
    let state = BatchState::new();
    let (next, effects) = update(state.clone(), Msg::NoOp);

    assert_eq!(state, next);
    assert!(effects.is_empty());
}
