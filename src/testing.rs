// Test doubles for the ingestion pipeline.
//
// - ScriptedSession (BrowserSession): URL→markup, scripted navigation failures
// - FlakyStore (AssetStore): MemoryStore that fails writes for chosen names
//
// MemoryStore itself lives in `store` since the CLI can use it too.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::browser::BrowserSession;
use crate::model::AssetRecord;
use crate::store::{AssetStore, MemoryStore};

// ---------------------------------------------------------------------------
// ScriptedSession
// ---------------------------------------------------------------------------

const VIEWPORT_HEIGHT: f64 = 900.0;
const PAGE_HEIGHT: f64 = 2700.0;

/// Markup served for URLs with no registered page.
const BLANK_PAGE: &str = "<body><p>nothing here</p></body>";

#[derive(Default)]
struct SessionState {
    current: Option<String>,
    visited: Vec<String>,
    navigations: HashMap<String, u32>,
    scroll_position: f64,
    scroll_height: f64,
    scroll_steps: u32,
}

/// In-memory browsing session. Serves registered markup per URL.
///
/// Scripts are recognized by shape: the scroll step (`scrollBy`) reports a
/// simulated viewport, the snapshot script (`outerHTML`) returns the page.
/// Builder pattern: `.with_page()`, `.failing_navigation()`,
/// `.failing_first_navigations()`, `.without_rows()`, `.with_endless_scroll()`.
pub struct ScriptedSession {
    pages: HashMap<String, String>,
    always_failing: HashSet<String>,
    failing_first: HashMap<String, u32>,
    rows_present: bool,
    endless_scroll: bool,
    state: Mutex<SessionState>,
}

impl Default for ScriptedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            always_failing: HashSet::new(),
            failing_first: HashMap::new(),
            rows_present: true,
            endless_scroll: false,
            state: Mutex::new(SessionState::default()),
        }
    }

    pub fn with_page(mut self, url: &str, markup: impl Into<String>) -> Self {
        self.pages.insert(url.to_string(), markup.into());
        self
    }

    /// Every navigation to `url` fails.
    pub fn failing_navigation(mut self, url: &str) -> Self {
        self.always_failing.insert(url.to_string());
        self
    }

    /// The first `count` navigations to `url` fail, later ones succeed.
    pub fn failing_first_navigations(mut self, url: &str, count: u32) -> Self {
        self.failing_first.insert(url.to_string(), count);
        self
    }

    /// The row selector never appears.
    pub fn without_rows(mut self) -> Self {
        self.rows_present = false;
        self
    }

    /// The page grows on every scroll step.
    pub fn with_endless_scroll(mut self) -> Self {
        self.endless_scroll = true;
        self
    }

    /// Navigation attempts made for `url`, failed ones included.
    pub fn navigations(&self, url: &str) -> u32 {
        self.lock().navigations.get(url).copied().unwrap_or(0)
    }

    /// URLs navigated to, in order, failed attempts included.
    pub fn visited(&self) -> Vec<String> {
        self.lock().visited.clone()
    }

    /// Scroll steps evaluated across the whole session.
    pub fn scroll_steps(&self) -> u32 {
        self.lock().scroll_steps
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn scroll_step(&self, script: &str) -> serde_json::Value {
        let step = script
            .split("scrollBy(0,")
            .nth(1)
            .and_then(|rest| rest.split(')').next())
            .and_then(|n| n.trim().parse::<f64>().ok())
            .unwrap_or(250.0);

        let mut state = self.lock();
        state.scroll_steps += 1;
        state.scroll_position = (state.scroll_position + step).min(state.scroll_height);
        if self.endless_scroll {
            state.scroll_height = state.scroll_position + VIEWPORT_HEIGHT;
        }
        serde_json::Value::String(
            serde_json::json!({
                "position": state.scroll_position,
                "height": state.scroll_height,
            })
            .to_string(),
        )
    }

    fn current_markup(&self) -> Option<String> {
        let state = self.lock();
        let url = state.current.as_ref()?;
        Some(self.pages.get(url).cloned().unwrap_or_else(|| BLANK_PAGE.to_string()))
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.lock();
        state.visited.push(url.to_string());
        let attempt = {
            let count = state.navigations.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        if self.always_failing.contains(url) {
            bail!("ScriptedSession: navigation to {url} timed out");
        }
        if let Some(failures) = self.failing_first.get(url) {
            if attempt <= *failures {
                bail!("ScriptedSession: transient failure {attempt} for {url}");
            }
        }

        state.current = Some(url.to_string());
        state.scroll_position = VIEWPORT_HEIGHT;
        state.scroll_height = PAGE_HEIGHT;
        Ok(())
    }

    async fn wait_for_selector(&self, _selector: &str, _timeout: Duration) -> bool {
        self.rows_present
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        if script.contains("scrollBy") {
            return Ok(self.scroll_step(script));
        }
        if script.contains("outerHTML") {
            return Ok(self
                .current_markup()
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null));
        }
        Ok(serde_json::Value::Null)
    }

    async fn snapshot(&self) -> Result<String> {
        match self.current_markup() {
            Some(markup) => Ok(markup),
            None => bail!("ScriptedSession: no page loaded"),
        }
    }
}

// ---------------------------------------------------------------------------
// FlakyStore
// ---------------------------------------------------------------------------

/// MemoryStore whose writes fail for a fixed set of asset names.
pub struct FlakyStore {
    inner: MemoryStore,
    failing: HashSet<String>,
}

impl FlakyStore {
    pub fn new(failing: &[&str]) -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: failing.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    fn check(&self, record: &AssetRecord) -> Result<()> {
        if self.failing.contains(&record.name) {
            bail!("FlakyStore: write rejected for {}", record.name);
        }
        Ok(())
    }
}

#[async_trait]
impl AssetStore for FlakyStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<AssetRecord>> {
        self.inner.find_by_name(name).await
    }

    async fn insert(&self, record: &AssetRecord) -> Result<()> {
        self.check(record)?;
        self.inner.insert(record).await
    }

    async fn update(&self, record: &AssetRecord) -> Result<()> {
        self.check(record)?;
        self.inner.update(record).await
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<AssetRecord>> {
        self.inner.list(offset, limit).await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<AssetRecord>> {
        self.inner.find_by_slug(slug).await
    }

    async fn count(&self) -> Result<usize> {
        self.inner.count().await
    }
}
