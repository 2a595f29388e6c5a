//! Harvester engine: page access, element location, extraction and packaging.
mod config;
mod detect;
mod extract;
mod filename;
mod interaction;
mod locator;
mod message;
mod normalize;
mod orchestrator;
mod package;
mod page;
mod persist;
mod types;

#[cfg(feature = "chrome")]
mod chrome;

#[cfg(feature = "chrome")]
pub use chrome::{ChromePage, ChromeSettings};
pub use config::{
    load_settings, load_settings_or_default, Clock, ConfigError, DetectionRules, EngineConfig,
    HarvestSettings, Selectors, SettleTimings,
};
pub use detect::{
    evaluate_page, is_knowledge_page, page_fingerprint, plan_trigger, Debouncer,
    TriggerPlacement,
};
pub use extract::{fallback_title, Extractor, NO_CONTENT_MARKER};
pub use filename::{dedupe_filenames, sanitize_filename, MAX_FILENAME_CHARS};
pub use interaction::{InteractionDriver, OpenOverlay};
pub use locator::{
    locate_entries, locate_entries_fallback, locate_single, run_chain, ChainHit, ProbeContext,
    ProbeError, ProbeOutput, Purpose, Strategy,
};
pub use message::{handle_request, HostRequest, HostResponse};
pub use normalize::{build_frontmatter, normalize, strip_markup};
pub use orchestrator::{BatchReport, Harvester, Notice};
pub use package::{
    archive_name, derive_project_name, BackgroundPackager, Bundle, PackageReceipt, Packager,
    PackagingError, ZipPackager, GENERIC_PROJECT_NAME,
};
pub use page::{settle, Page, PageError, StaticPage};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use types::{DocumentEntry, NodePath, PortableDocument};
