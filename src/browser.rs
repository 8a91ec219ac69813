//! Headless browsing session used by the page fetcher.
//!
//! `headless_chrome` is a blocking API, so every call runs on
//! `spawn_blocking` and is bounded by `tokio::time::timeout`. The fetcher
//! only sees the [`BrowserSession`] trait, which tests replace with a
//! scripted session.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tracing::{debug, info};

use crate::config::{BrowserConfig, ENV_CONTAINER};

/// Extra time allowed on top of a call's own timeout before the blocking
/// task is abandoned.
const CALL_GRACE: Duration = Duration::from_secs(5);

/// Bound for calls that have no timeout of their own (evaluate, snapshot).
const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// The rendering collaborator the fetcher drives.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the page to settle, failing after `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait for `selector` to match; `false` on timeout.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> bool;

    /// Evaluate a script in the page and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Full document markup.
    async fn snapshot(&self) -> Result<String>;
}

/// True when running inside a container, where Chrome's sandbox is unavailable.
pub fn is_container() -> bool {
    std::env::var(ENV_CONTAINER).is_ok() || Path::new("/.dockerenv").exists()
}

/// Chrome binary to use: config/`CHROME_PATH` first, then a WSL install.
fn resolve_chrome_path(config: &BrowserConfig) -> Option<PathBuf> {
    config.chrome_path.clone().or_else(|| {
        let wsl_path = Path::new("/mnt/c/Program Files/Google/Chrome/Application/chrome.exe");
        if wsl_path.exists() {
            Some(wsl_path.to_path_buf())
        } else {
            None
        }
    })
}

/// Launch a headless Chrome instance. Blocking.
fn create_browser(config: &BrowserConfig) -> Result<Browser> {
    let sandbox = config.sandbox && !is_container();
    let chrome_path = resolve_chrome_path(config);
    let idle_timeout = Duration::from_secs(config.navigation_timeout_secs.max(30) * 2);

    debug!(
        "Launching Chrome (sandbox={}, path={:?}, window={}x{})",
        sandbox, chrome_path, config.window_width, config.window_height
    );

    let options = LaunchOptions::default_builder()
        .sandbox(sandbox)
        .path(chrome_path)
        .window_size(Some((config.window_width, config.window_height)))
        .idle_browser_timeout(idle_timeout)
        .build()
        .map_err(|e| anyhow!("Failed to build Chrome launch options: {}", e))?;

    Browser::new(options).map_err(|e| anyhow!("Failed to launch headless Chrome: {}", e))
}

/// Run `f` on the blocking pool, one call at a time per `gate`, bounded by
/// `limit`.
///
/// A call that times out is abandoned, not cancelled: its blocking task keeps
/// the gate until `f` returns, so the next call waits for it instead of
/// driving the same resource concurrently. That wait counts against the next
/// call's own `limit`.
async fn run_exclusive<R, T, F>(resource: Arc<R>, gate: Arc<Mutex<()>>, what: &str, limit: Duration, f: F) -> Result<T>
where
    R: Send + Sync + 'static,
    F: FnOnce(Arc<R>) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let _held = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(resource)
    });
    match tokio::time::timeout(limit, handle).await {
        Ok(joined) => joined.map_err(|e| anyhow!("Blocking task panicked: {}", e))?,
        Err(_) => Err(anyhow!("{} timed out after {:?}", what, limit)),
    }
}

/// A single Chrome tab reused across every page of a run.
///
/// Dropping the session drops the `Browser`, which kills the Chrome process.
pub struct ChromeSession {
    _browser: Browser,
    tab: Arc<Tab>,
    gate: Arc<Mutex<()>>,
}

impl ChromeSession {
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let config = config.clone();
        let session = tokio::task::spawn_blocking(move || -> Result<ChromeSession> {
            let browser = create_browser(&config)?;
            let tab = browser
                .new_tab()
                .map_err(|e| anyhow!("Failed to create tab: {}", e))?;
            tab.set_user_agent(&config.user_agent, None, None)
                .map_err(|e| anyhow!("Failed to set user agent: {}", e))?;
            Ok(ChromeSession {
                _browser: browser,
                tab,
                gate: Arc::new(Mutex::new(())),
            })
        })
        .await
        .map_err(|e| anyhow!("Blocking task panicked: {}", e))??;

        info!("Headless Chrome session ready");
        Ok(session)
    }

    /// Run a blocking tab operation off the async runtime, bounded by `limit`.
    ///
    /// Tab calls also carry Chrome-side timeouts (`set_default_timeout`,
    /// custom element waits) shorter than `limit`, so an abandoned call
    /// normally returns within the grace period.
    async fn with_tab<T, F>(&self, what: &str, limit: Duration, f: F) -> Result<T>
    where
        F: FnOnce(Arc<Tab>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        run_exclusive(Arc::clone(&self.tab), Arc::clone(&self.gate), what, limit, f).await
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        let url = url.to_string();
        self.with_tab("Navigation", timeout + CALL_GRACE, move |tab| {
            tab.set_default_timeout(timeout);
            tab.navigate_to(&url)
                .map_err(|e| anyhow!("Navigation failed: {}", e))?;
            tab.wait_until_navigated()
                .map_err(|e| anyhow!("Page load failed: {}", e))?;
            Ok(())
        })
        .await
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> bool {
        let selector = selector.to_string();
        self.with_tab("Selector wait", timeout + CALL_GRACE, move |tab| {
            Ok(tab
                .wait_for_element_with_custom_timeout(&selector, timeout)
                .is_ok())
        })
        .await
        .unwrap_or(false)
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let script = script.to_string();
        self.with_tab("Script evaluation", DEFAULT_CALL_TIMEOUT, move |tab| {
            let result = tab
                .evaluate(&script, false)
                .map_err(|e| anyhow!("Script evaluation failed: {}", e))?;
            Ok(result.value.unwrap_or(serde_json::Value::Null))
        })
        .await
    }

    async fn snapshot(&self) -> Result<String> {
        self.with_tab("Snapshot", DEFAULT_CALL_TIMEOUT, |tab| {
            tab.get_content()
                .map_err(|e| anyhow!("Failed to get rendered content: {}", e))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_timed_out_call_blocks_the_next_one() {
        let in_use = Arc::new(AtomicBool::new(false));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Mutex::new(()));

        let slow = {
            let (in_use, overlaps) = (Arc::clone(&in_use), Arc::clone(&overlaps));
            move |_: Arc<()>| -> Result<()> {
                if in_use.swap(true, Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(Duration::from_millis(300));
                in_use.store(false, Ordering::SeqCst);
                Ok(())
            }
        };
        let quick = {
            let (in_use, overlaps) = (Arc::clone(&in_use), Arc::clone(&overlaps));
            move |_: Arc<()>| -> Result<u32> {
                if in_use.load(Ordering::SeqCst) {
                    overlaps.fetch_add(1, Ordering::SeqCst);
                }
                Ok(7)
            }
        };

        let first = run_exclusive(Arc::new(()), Arc::clone(&gate), "Navigation", Duration::from_millis(50), slow).await;
        assert!(first.unwrap_err().to_string().contains("timed out"));

        let second = run_exclusive(Arc::new(()), Arc::clone(&gate), "Snapshot", Duration::from_secs(5), quick).await;
        assert_eq!(second.unwrap(), 7);
        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_configured_chrome_path_wins() {
        let mut config = AppConfig::default().browser;
        config.chrome_path = Some(PathBuf::from("/opt/google/chrome/chrome"));
        assert_eq!(
            resolve_chrome_path(&config),
            Some(PathBuf::from("/opt/google/chrome/chrome"))
        );
    }
}
