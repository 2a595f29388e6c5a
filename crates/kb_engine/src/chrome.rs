//! `Page` over a Chrome tab driven through the DevTools protocol.

use std::sync::Arc;

use headless_chrome::{Browser, LaunchOptions, Tab};
use kb_logging::{kb_debug, kb_info};

use crate::{NodePath, Page, PageError};

#[derive(Debug, Clone)]
pub struct ChromeSettings {
    pub headless: bool,
    pub window_width: u32,
    pub window_height: u32,
    /// Attach to a running browser on this DevTools port instead of launching one.
    pub debug_port: Option<u16>,
}

impl Default for ChromeSettings {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            debug_port: None,
        }
    }
}

pub struct ChromePage {
    // Dropping the browser closes the tab.
    _browser: Browser,
    tab: Arc<Tab>,
}

fn driver_error(context: &str, err: impl std::fmt::Display) -> PageError {
    PageError::Driver(format!("{context}: {err}"))
}

impl ChromePage {
    pub fn launch(settings: &ChromeSettings) -> Result<Self, PageError> {
        let browser = match settings.debug_port {
            Some(port) => {
                kb_info!("Attaching to browser on port {}", port);
                Browser::connect(format!("http://127.0.0.1:{port}"))
                    .map_err(|e| driver_error("connect", e))?
            }
            None => {
                kb_info!("Launching browser (headless: {})", settings.headless);
                let options = LaunchOptions::default_builder()
                    .headless(settings.headless)
                    .window_size(Some((settings.window_width, settings.window_height)))
                    .build()
                    .map_err(|e| driver_error("launch options", e))?;
                Browser::new(options).map_err(|e| driver_error("launch", e))?
            }
        };
        let tab = browser.new_tab().map_err(|e| driver_error("new tab", e))?;
        Ok(Self {
            _browser: browser,
            tab,
        })
    }

    pub fn navigate(&self, url: &str) -> Result<(), PageError> {
        self.tab
            .navigate_to(url)
            .map_err(|e| driver_error("navigate", e))?;
        self.tab
            .wait_until_navigated()
            .map_err(|e| driver_error("navigation timeout", e))?;
        kb_info!("Navigated to {}", url);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Page for ChromePage {
    async fn content(&self) -> Result<String, PageError> {
        self.tab
            .get_content()
            .map_err(|e| PageError::Unavailable(e.to_string()))
    }

    async fn url(&self) -> Result<String, PageError> {
        Ok(self.tab.get_url())
    }

    async fn click(&self, target: &NodePath) -> Result<(), PageError> {
        let selector = target.to_selector();
        kb_debug!("Clicking {}", selector);
        let element = self
            .tab
            .find_element(&selector)
            .map_err(|_| PageError::NodeNotFound(selector.clone()))?;
        element.click().map_err(|e| driver_error("click", e))?;
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PageError> {
        self.tab
            .press_key(key)
            .map_err(|e| driver_error("key press", e))?;
        Ok(())
    }

    async fn midpoint(&self, target: &NodePath) -> Result<Option<(f64, f64)>, PageError> {
        let selector = target.to_selector();
        let Ok(element) = self.tab.find_element(&selector) else {
            return Ok(None);
        };
        Ok(element.get_midpoint().ok().map(|point| (point.x, point.y)))
    }
}
