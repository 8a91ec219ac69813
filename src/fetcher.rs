//! Page fetcher: navigation with retry, scroll-driven content realization
//! and snapshot capture.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::browser::BrowserSession;
use crate::config::AppConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("navigation to {url} failed after {attempts} attempts: {last_error}")]
    NavigationExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },

    #[error("could not capture page content for {url}: {error}")]
    Snapshot { url: String, error: String },
}

/// Scroll pacing for lazily rendered rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrollSettings {
    pub step_px: u32,
    pub interval: Duration,
    pub max_steps: u32,
}

/// Everything the fetcher needs besides the session.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub navigation_timeout: Duration,
    pub ready_selector: String,
    pub selector_timeout: Duration,
    pub table_selector: String,
    pub retry: RetryPolicy,
    pub scroll: ScrollSettings,
}

impl FetchSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            navigation_timeout: config.browser.navigation_timeout(),
            ready_selector: config.source.ready_selector.clone(),
            selector_timeout: config.browser.selector_timeout(),
            table_selector: config.source.table_selector.clone(),
            retry: RetryPolicy::from_config(&config.retry),
            scroll: ScrollSettings {
                step_px: config.scroll.step_px,
                interval: Duration::from_millis(config.scroll.interval_ms),
                max_steps: config.scroll.max_steps,
            },
        }
    }
}

/// Scroll position reported by the page after one step.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
struct ScrollState {
    /// Bottom edge of the viewport.
    position: f64,
    /// Current scrollable height.
    height: f64,
}

pub struct PageFetcher {
    settings: FetchSettings,
}

impl PageFetcher {
    pub fn new(settings: FetchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    /// Navigate to `url`, realize lazily rendered content and return the
    /// listing markup.
    pub async fn fetch_page(&self, session: &dyn BrowserSession, url: &str) -> Result<String, FetchError> {
        self.navigate(session, url).await?;

        if session
            .wait_for_selector(&self.settings.ready_selector, self.settings.selector_timeout)
            .await
        {
            debug!(url, "Table rows present");
        } else {
            warn!(
                url,
                "Row selector not found within {:?}; continuing with current content",
                self.settings.selector_timeout
            );
        }

        let steps = self.scroll_to_end(session).await;
        debug!(url, steps, "Scrolling finished");

        self.capture(session, url).await
    }

    async fn navigate(&self, session: &dyn BrowserSession, url: &str) -> Result<(), FetchError> {
        let timeout = self.settings.navigation_timeout;
        self.settings
            .retry
            .run(|attempt| async move {
                debug!(url, attempt, "Navigating");
                session.navigate(url, timeout).await
            })
            .await
            .map_err(|(attempts, e)| FetchError::NavigationExhausted {
                url: url.to_string(),
                attempts,
                last_error: e.to_string(),
            })?;
        info!(url, "Page loaded");
        Ok(())
    }

    /// Scroll in fixed steps until the viewport reaches the end of a page
    /// that stopped growing, or `max_steps` is hit. Returns the steps taken.
    async fn scroll_to_end(&self, session: &dyn BrowserSession) -> u32 {
        let scroll = &self.settings.scroll;
        let script = scroll_step_script(scroll.step_px);
        let mut last_height: Option<f64> = None;
        let mut steps = 0;

        while steps < scroll.max_steps {
            steps += 1;
            let state = match session.evaluate(&script).await {
                Ok(value) => match decode_value::<ScrollState>(value) {
                    Some(state) => state,
                    None => {
                        debug!("Unreadable scroll state; stopping scroll");
                        break;
                    }
                },
                Err(e) => {
                    warn!("Scroll step failed: {}", e);
                    break;
                }
            };

            let grew = last_height.map(|h| state.height > h).unwrap_or(true);
            if state.position >= state.height && !grew {
                break;
            }
            last_height = Some(state.height);

            if !scroll.interval.is_zero() {
                tokio::time::sleep(scroll.interval).await;
            }
        }

        steps
    }

    async fn capture(&self, session: &dyn BrowserSession, url: &str) -> Result<String, FetchError> {
        let script = snapshot_script(&self.settings.table_selector);
        match session.evaluate(&script).await {
            Ok(serde_json::Value::String(markup)) if !markup.trim().is_empty() => return Ok(markup),
            Ok(_) => debug!(url, "No table or body markup; using full document"),
            Err(e) => debug!(url, "Snapshot script failed ({}); using full document", e),
        }

        session.snapshot().await.map_err(|e| FetchError::Snapshot {
            url: url.to_string(),
            error: e.to_string(),
        })
    }
}

/// Accept either a JSON value or a JSON-encoded string.
fn decode_value<T: for<'de> Deserialize<'de>>(value: serde_json::Value) -> Option<T> {
    match value {
        serde_json::Value::String(text) => serde_json::from_str(&text).ok(),
        other => serde_json::from_value(other).ok(),
    }
}

fn scroll_step_script(step_px: u32) -> String {
    format!(
        r#"(() => {{
    const root = document.scrollingElement || document.documentElement;
    window.scrollBy(0, {step});
    return JSON.stringify({{
        position: window.scrollY + window.innerHeight,
        height: Math.max(root.scrollHeight, document.body ? document.body.scrollHeight : 0)
    }});
}})()"#,
        step = step_px
    )
}

fn snapshot_script(table_selector: &str) -> String {
    // A JSON string literal is also a valid JS string literal.
    let selector = serde_json::to_string(table_selector).unwrap_or_else(|_| "\"table\"".to_string());
    format!(
        r#"(() => {{
    const table = document.querySelector({selector}) || document.querySelector("table");
    if (table) return table.outerHTML;
    return document.body ? document.body.outerHTML : null;
}})()"#,
        selector = selector
    )
}
