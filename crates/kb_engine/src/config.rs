use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kb_logging::{kb_info, kb_warn};
use serde::{Deserialize, Serialize};

/// Source of "now" for export timestamps and archive names.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(String),
}

/// Fixed settle intervals standing in for the "overlay ready" signal the host never sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettleTimings {
    pub open_ms: u64,
    pub close_ms: u64,
    pub probe_ms: u64,
}

impl Default for SettleTimings {
    fn default() -> Self {
        Self {
            open_ms: 1500,
            close_ms: 500,
            probe_ms: 500,
        }
    }
}

impl SettleTimings {
    /// No waiting at all; for static snapshots and tests.
    pub fn immediate() -> Self {
        Self {
            open_ms: 0,
            close_ms: 0,
            probe_ms: 0,
        }
    }

    pub fn open(&self) -> Duration {
        Duration::from_millis(self.open_ms)
    }

    pub fn close(&self) -> Duration {
        Duration::from_millis(self.close_ms)
    }

    pub fn probe(&self) -> Duration {
        Duration::from_millis(self.probe_ms)
    }
}

/// CSS selector tables for every locator chain, most specific first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selectors {
    pub entries_precise: String,
    pub entries_semantic: Vec<String>,
    pub entries_generic: Vec<String>,
    pub entries_structural: Vec<String>,
    pub main_region: Vec<String>,
    pub overlay: Vec<String>,
    pub overlay_title_precise: String,
    pub overlay_title: Vec<String>,
    pub overlay_content_precise: String,
    pub overlay_content: Vec<String>,
    pub close_controls: Vec<String>,
    pub controls: Vec<String>,
    pub open_vocabulary: Vec<String>,
    pub close_vocabulary: Vec<String>,
    pub project_heading: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            entries_precise: "body main section[data-testid=\"project-knowledge\"] > ul > li"
                .to_string(),
            entries_semantic: strings(&[
                "[data-testid=\"knowledge-item\"]",
                "[data-testid*=\"knowledge\"] [data-testid*=\"file\"]",
                "[role=\"list\"] > [role=\"listitem\"]",
            ]),
            entries_generic: strings(&["main li", "main article"]),
            entries_structural: strings(&[
                "[class*=\"file-card\"]",
                "[class*=\"document-item\"]",
                "[class*=\"knowledge\"] [class*=\"card\"]",
            ]),
            main_region: strings(&["main", "[role=\"main\"]", "body"]),
            overlay: strings(&[
                "[role=\"dialog\"]",
                "dialog[open]",
                "[aria-modal=\"true\"]",
                ".modal",
                "[class*=\"overlay\"]",
            ]),
            overlay_title_precise: "[role=\"dialog\"] > div > header > h2".to_string(),
            overlay_title: strings(&[
                "h1",
                "h2",
                "h3",
                "[role=\"heading\"]",
                ".modal-title",
                "[data-testid*=\"title\"]",
            ]),
            overlay_content_precise:
                "[role=\"dialog\"] > div > div[data-testid=\"document-content\"]".to_string(),
            overlay_content: strings(&[
                "[data-testid*=\"content\"]",
                ".prose",
                "article",
                "pre",
            ]),
            close_controls: strings(&[
                "button[aria-label=\"Close\"]",
                "button[aria-label=\"close\"]",
                "[data-testid*=\"close\"]",
                ".close",
            ]),
            controls: strings(&["button", "[role=\"button\"]", "a[href]"]),
            open_vocabulary: strings(&["open", "view", "edit", "preview", "show", "details", "read"]),
            close_vocabulary: strings(&["close", "done", "cancel", "×", "dismiss"]),
            project_heading: strings(&["main h1", "header h1", "h1"]),
        }
    }
}

/// Signals that tell whether the current page hosts a knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionRules {
    pub route_fragments: Vec<String>,
    pub markers: Vec<String>,
    pub title_keywords: Vec<String>,
    pub anchor_controls: Vec<String>,
    pub debounce_ms: u64,
}

impl Default for DetectionRules {
    fn default() -> Self {
        Self {
            route_fragments: strings(&["/project/", "/knowledge"]),
            markers: strings(&[
                "[data-testid=\"project-knowledge\"]",
                "[data-testid*=\"knowledge\"]",
                "[class*=\"knowledge\"]",
            ]),
            title_keywords: strings(&["knowledge", "project"]),
            anchor_controls: strings(&[
                "[data-testid=\"add-knowledge\"]",
                "button[aria-label*=\"knowledge\"]",
                "[data-testid*=\"knowledge\"] button",
            ]),
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestSettings {
    pub timings: SettleTimings,
    pub selectors: Selectors,
    pub detection: DetectionRules,
    pub output_dir: PathBuf,
}

impl Default for HarvestSettings {
    fn default() -> Self {
        Self {
            timings: SettleTimings::default(),
            selectors: Selectors::default(),
            detection: DetectionRules::default(),
            output_dir: PathBuf::from("output"),
        }
    }
}

pub fn load_settings(path: &Path) -> Result<HarvestSettings, ConfigError> {
    let content = fs::read_to_string(path)?;
    ron::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))
}

/// Loads settings, falling back to defaults when the file is missing or unreadable.
pub fn load_settings_or_default(path: &Path) -> HarvestSettings {
    match load_settings(path) {
        Ok(settings) => {
            kb_info!("Loaded settings from {:?}", path);
            settings
        }
        Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            HarvestSettings::default()
        }
        Err(err) => {
            kb_warn!("Ignoring settings at {:?}: {}", path, err);
            HarvestSettings::default()
        }
    }
}

#[derive(Clone)]
pub struct EngineConfig {
    pub settings: HarvestSettings,
    pub now_utc: Clock,
}

impl EngineConfig {
    pub fn new(settings: HarvestSettings) -> Self {
        Self {
            settings,
            now_utc: Arc::new(Utc::now),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.now_utc)()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(HarvestSettings::default())
    }
}
