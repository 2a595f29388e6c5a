use std::time::Duration;

use kb_logging::kb_debug;

use crate::NodePath;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PageError {
    #[error("page unavailable: {0}")]
    Unavailable(String),
    #[error("no element at {0}")]
    NodeNotFound(String),
    #[error("driver error: {0}")]
    Driver(String),
}

/// The live page being harvested.
///
/// Implementations hand out markup snapshots and dispatch user-like input.
/// Nothing returned here stays valid across a re-render, so callers re-read
/// the markup after every interaction.
#[async_trait::async_trait]
pub trait Page: Send + Sync {
    /// Current rendered markup of the whole document.
    async fn content(&self) -> Result<String, PageError>;

    async fn url(&self) -> Result<String, PageError>;

    /// Dispatch a synthetic click on the element at `target`.
    async fn click(&self, target: &NodePath) -> Result<(), PageError>;

    /// Dispatch a key press to the focused document (e.g. `Escape`).
    async fn press_key(&self, key: &str) -> Result<(), PageError>;

    /// On-screen centre of the element, when the page has layout information.
    async fn midpoint(&self, _target: &NodePath) -> Result<Option<(f64, f64)>, PageError> {
        Ok(None)
    }
}

/// Suspend for `interval`, then sample the page markup once.
pub async fn settle(page: &dyn Page, interval: Duration) -> Result<String, PageError> {
    wait(interval).await;
    page.content().await
}

pub(crate) async fn wait(interval: Duration) {
    if !interval.is_zero() {
        tokio::time::sleep(interval).await;
    }
}

/// A saved page: markup never changes and input is accepted but has no effect.
#[derive(Debug, Clone)]
pub struct StaticPage {
    url: String,
    html: String,
}

impl StaticPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }
}

#[async_trait::async_trait]
impl Page for StaticPage {
    async fn content(&self) -> Result<String, PageError> {
        Ok(self.html.clone())
    }

    async fn url(&self) -> Result<String, PageError> {
        Ok(self.url.clone())
    }

    async fn click(&self, target: &NodePath) -> Result<(), PageError> {
        kb_debug!("Static page ignores click on {}", target);
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<(), PageError> {
        kb_debug!("Static page ignores key {}", key);
        Ok(())
    }
}
