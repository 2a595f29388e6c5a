use kb_core::StepOutcome;
use kb_logging::{kb_debug, kb_warn};

use crate::locator::{inspect, locate_with, Purpose};
use crate::page::wait;
use crate::{DocumentEntry, NodePath, Page, Selectors, SettleTimings};

/// The overlay currently held open, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOverlay {
    pub entry_index: usize,
    pub trigger: NodePath,
}

/// Opens and closes document overlays. The overlay is a page-global
/// singleton, so at most one is held at a time.
pub struct InteractionDriver<'p> {
    page: &'p dyn Page,
    selectors: &'p Selectors,
    timings: SettleTimings,
    slot: Option<OpenOverlay>,
}

impl<'p> InteractionDriver<'p> {
    pub fn new(page: &'p dyn Page, selectors: &'p Selectors, timings: SettleTimings) -> Self {
        Self {
            page,
            selectors,
            timings,
            slot: None,
        }
    }

    pub fn current(&self) -> Option<&OpenOverlay> {
        self.slot.as_ref()
    }

    /// Activate the entry's detail control and wait for the overlay to settle.
    ///
    /// Returns `Fallback` when the entry node itself had to be clicked.
    pub async fn open(&mut self, entry: &DocumentEntry) -> StepOutcome {
        if let Some(stale_index) = self.slot.as_ref().map(|o| o.entry_index) {
            kb_warn!(
                "Overlay for entry {} still open; closing before entry {}",
                stale_index,
                entry.index
            );
            self.close().await;
        }

        let markup = match self.page.content().await {
            Ok(markup) => markup,
            Err(err) => {
                kb_warn!("Cannot open entry {}: {}", entry.index, err);
                return StepOutcome::Failed(err.to_string());
            }
        };
        let trigger = inspect(&markup, self.selectors, Some(&entry.node), |ctx| {
            locate_with(ctx, Purpose::OpenTrigger)
        });
        let Some(trigger) = trigger else {
            kb_warn!("Entry {} is no longer on the page", entry.index);
            return StepOutcome::Failed(format!("entry {} is no longer present", entry.index));
        };

        if let Err(err) = self.page.click(&trigger).await {
            kb_warn!("Click on {} failed for entry {}: {}", trigger, entry.index, err);
            return StepOutcome::Failed(err.to_string());
        }
        let used_entry_itself = trigger == entry.node;
        self.slot = Some(OpenOverlay {
            entry_index: entry.index,
            trigger,
        });
        wait(self.timings.open()).await;

        if used_entry_itself {
            StepOutcome::Fallback
        } else {
            StepOutcome::Done
        }
    }

    /// Dismiss the overlay via its close control, or `Escape` when none is found.
    /// The slot is released whatever happens.
    pub async fn close(&mut self) -> StepOutcome {
        let released = self.slot.take();
        let entry_index = released.as_ref().map(|o| o.entry_index);

        let control = match self.page.content().await {
            Ok(markup) => inspect(&markup, self.selectors, None, |ctx| {
                locate_with(ctx, Purpose::CloseControl)
            }),
            Err(err) => {
                kb_warn!("Cannot read page to close overlay: {}", err);
                None
            }
        };

        if let Some(control) = control {
            match self.page.click(&control).await {
                Ok(()) => {
                    wait(self.timings.close()).await;
                    return StepOutcome::Done;
                }
                Err(err) => kb_warn!("Close control {} failed: {}", control, err),
            }
        }

        kb_debug!("No close control for entry {:?}; sending Escape", entry_index);
        match self.page.press_key("Escape").await {
            Ok(()) => {
                wait(self.timings.close()).await;
                StepOutcome::Fallback
            }
            Err(err) => {
                kb_warn!("Escape failed for entry {:?}: {}", entry_index, err);
                StepOutcome::Failed(err.to_string())
            }
        }
    }
}
