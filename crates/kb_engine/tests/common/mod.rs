#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use chrono::{DateTime, TimeZone, Utc};
use kb_engine::{EngineConfig, HarvestSettings, NodePath, Page, PageError, SettleTimings};
use scraper::Html;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(kb_logging::initialize_for_tests);
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 17, 8, 30, 0).unwrap()
}

/// Engine config with no settle delays, a fixed clock and `output_dir`.
pub fn test_config(output_dir: &std::path::Path) -> EngineConfig {
    let settings = HarvestSettings {
        timings: SettleTimings::immediate(),
        output_dir: output_dir.to_path_buf(),
        ..HarvestSettings::default()
    };
    EngineConfig {
        settings,
        now_utc: Arc::new(fixed_now),
    }
}

#[derive(Debug, Clone)]
pub struct ScriptedEntry {
    pub title: String,
    pub content: String,
    /// Render an "Open" button inside the entry.
    pub with_control: bool,
    /// Clicking this entry fails at the driver level.
    pub broken: bool,
}

impl ScriptedEntry {
    pub fn new(title: &str, content: &str) -> Self {
        Self {
            title: title.to_string(),
            content: content.to_string(),
            with_control: true,
            broken: false,
        }
    }

    pub fn without_control(mut self) -> Self {
        self.with_control = false;
        self
    }

    pub fn broken(mut self) -> Self {
        self.broken = true;
        self
    }
}

#[derive(Default)]
struct Interactions {
    open: Option<usize>,
    clicks: Vec<NodePath>,
    keys: Vec<String>,
    closes: usize,
    /// Listed first once the first overlay has been dismissed.
    arriving: Option<ScriptedEntry>,
}

/// In-memory knowledge page: a list of entries, each revealing a dialog when clicked.
///
/// The dialog carries a close button unless `without_close_button` is used,
/// and `Escape` always dismisses it.
pub struct ScriptedPage {
    url: String,
    heading: Option<String>,
    entries: Vec<ScriptedEntry>,
    close_button: bool,
    banner: bool,
    state: Mutex<Interactions>,
}

impl ScriptedPage {
    pub fn new(entries: Vec<ScriptedEntry>) -> Self {
        Self {
            url: "https://kb.example.test/project/0f3a9c2e-77b1".to_string(),
            heading: Some("Research Notes".to_string()),
            entries,
            close_button: true,
            banner: false,
            state: Mutex::new(Interactions::default()),
        }
    }

    pub fn without_close_button(mut self) -> Self {
        self.close_button = false;
        self
    }

    pub fn without_heading(mut self) -> Self {
        self.heading = None;
        self
    }

    /// Adds a host banner with its own `aria-label="Close"` dismiss button.
    pub fn with_banner(mut self) -> Self {
        self.banner = true;
        self
    }

    /// `entry` appears at the top of the list after the first overlay closes.
    pub fn with_arrival_after_first_close(self, entry: ScriptedEntry) -> Self {
        self.state.lock().unwrap().arriving = Some(entry);
        self
    }

    fn listed(&self, state: &Interactions) -> Vec<ScriptedEntry> {
        let arrived = state.arriving.iter().filter(|_| state.closes > 0).cloned();
        arrived.chain(self.entries.iter().cloned()).collect()
    }

    pub fn click_count(&self) -> usize {
        self.state.lock().unwrap().clicks.len()
    }

    pub fn keys(&self) -> Vec<String> {
        self.state.lock().unwrap().keys.clone()
    }

    pub fn open_entry(&self) -> Option<usize> {
        self.state.lock().unwrap().open
    }

    pub fn render(&self) -> String {
        let (open, entries) = {
            let state = self.state.lock().unwrap();
            (state.open, self.listed(&state))
        };
        let heading = self
            .heading
            .as_ref()
            .map(|h| format!("<h1>{h}</h1>"))
            .unwrap_or_default();
        let items: String = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let control = if entry.with_control {
                    "<button aria-label=\"Open document\">Open</button>"
                } else {
                    ""
                };
                format!(
                    "<li data-entry=\"{i}\"><span class=\"name\">{}</span>{control}</li>",
                    entry.title
                )
            })
            .collect();
        let list = if entries.is_empty() {
            "<p>Nothing here yet</p>".to_string()
        } else {
            format!("<section data-testid=\"project-knowledge\"><ul>{items}</ul></section>")
        };
        let dialog = open
            .and_then(|i| entries.get(i))
            .map(|entry| {
                let close = if self.close_button {
                    "<button aria-label=\"Close\" data-action=\"close\">×</button>"
                } else {
                    ""
                };
                format!(
                    "<div role=\"dialog\"><div><header><h2>{}</h2>{close}</header>\
                     <div data-testid=\"document-content\">{}</div></div></div>",
                    entry.title, entry.content
                )
            })
            .unwrap_or_default();
        let banner = if self.banner {
            "<div class=\"banner\"><button aria-label=\"Close\" data-action=\"dismiss-banner\">x</button></div>"
        } else {
            ""
        };
        format!(
            "<html><head><title>Project knowledge</title></head><body>\
             {banner}<main>{heading}{list}</main>{dialog}</body></html>"
        )
    }

    /// What a click at `target` hits: an entry index, the close button, or nothing.
    fn hit(&self, target: &NodePath) -> Result<Hit, PageError> {
        let doc = Html::parse_document(&self.render());
        let element = target
            .resolve(&doc)
            .ok_or_else(|| PageError::NodeNotFound(target.to_string()))?;
        let mut current = Some(element);
        while let Some(el) = current {
            if el.value().attr("data-action") == Some("close") {
                return Ok(Hit::Close);
            }
            if let Some(index) = el.value().attr("data-entry") {
                return Ok(index.parse().map(Hit::Entry).unwrap_or(Hit::Nothing));
            }
            current = el.parent().and_then(scraper::ElementRef::wrap);
        }
        Ok(Hit::Nothing)
    }
}

enum Hit {
    Entry(usize),
    Close,
    Nothing,
}

#[async_trait::async_trait]
impl Page for ScriptedPage {
    async fn content(&self) -> Result<String, PageError> {
        Ok(self.render())
    }

    async fn url(&self) -> Result<String, PageError> {
        Ok(self.url.clone())
    }

    async fn click(&self, target: &NodePath) -> Result<(), PageError> {
        let hit = self.hit(target)?;
        let mut state = self.state.lock().unwrap();
        state.clicks.push(target.clone());
        let listed = self.listed(&state);
        match hit {
            Hit::Entry(index) if listed.get(index).is_some_and(|entry| entry.broken) => {
                Err(PageError::Driver(format!("entry {index} is detached")))
            }
            Hit::Entry(index) => {
                state.open = Some(index);
                Ok(())
            }
            Hit::Close => {
                if state.open.take().is_some() {
                    state.closes += 1;
                }
                Ok(())
            }
            Hit::Nothing => Ok(()),
        }
    }

    async fn press_key(&self, key: &str) -> Result<(), PageError> {
        let mut state = self.state.lock().unwrap();
        state.keys.push(key.to_string());
        if key == "Escape" && state.open.take().is_some() {
            state.closes += 1;
        }
        Ok(())
    }
}
