use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use kb_engine::{Page, StaticPage};

#[derive(Args, Debug, Clone)]
pub struct PageSource {
    /// Saved page markup to harvest
    #[arg(long, required_unless_present = "live")]
    pub html: Option<PathBuf>,

    /// Page address; navigated to with --live, otherwise only used for naming
    #[arg(long)]
    pub url: Option<String>,

    /// Drive a live browser tab (needs the `chrome` feature)
    #[arg(long, conflicts_with = "html", requires = "url")]
    pub live: bool,

    /// Show the browser window
    #[arg(long, requires = "live")]
    pub headed: bool,

    /// Attach to a browser already listening on this DevTools port
    #[arg(long, requires = "live")]
    pub debug_port: Option<u16>,
}

impl PageSource {
    pub fn open(&self) -> Result<Box<dyn Page>> {
        if self.live {
            return self.open_live();
        }
        let Some(path) = &self.html else {
            bail!("either --html or --live is required");
        };
        let markup = fs::read_to_string(path)
            .with_context(|| format!("reading page snapshot {}", path.display()))?;
        let url = self
            .url
            .clone()
            .unwrap_or_else(|| format!("file://{}", path.display()));
        Ok(Box::new(StaticPage::new(url, markup)))
    }

    #[cfg(feature = "chrome")]
    fn open_live(&self) -> Result<Box<dyn Page>> {
        use kb_engine::{ChromePage, ChromeSettings};

        let settings = ChromeSettings {
            headless: !self.headed,
            debug_port: self.debug_port,
            ..ChromeSettings::default()
        };
        let page = ChromePage::launch(&settings)?;
        if let Some(url) = &self.url {
            page.navigate(url)?;
        }
        Ok(Box::new(page))
    }

    #[cfg(not(feature = "chrome"))]
    fn open_live(&self) -> Result<Box<dyn Page>> {
        kb_logging::kb_debug!(
            "Live page requested (headed: {}, port: {:?})",
            self.headed,
            self.debug_port
        );
        bail!("--live needs kb-harvest built with the `chrome` feature")
    }
}
