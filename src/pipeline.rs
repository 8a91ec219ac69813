//! Pagination driver: fetch, parse and reconcile one listing page at a time.
//!
//! Failures are isolated by granularity. A bad row is counted and skipped,
//! a bad page is logged and the next page number is tried, and nothing
//! short of a panic ends the run early except the short-page signal.

use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::browser::BrowserSession;
use crate::config::{AppConfig, ConfigError};
use crate::fetcher::{FetchError, FetchSettings, PageFetcher};
use crate::logger::RunLogger;
use crate::reconcile::{Reconciler, UpsertOutcome};
use crate::table::{parse_listing, ListingSelectors, TableError};

/// Hard ceiling on pages per run.
pub const MAX_PAGES: u32 = 100;

/// Page-level failures; the page is skipped and the run continues.
#[derive(Debug, Error)]
pub enum PageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Table(#[from] TableError),
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Records stored (created + updated).
    pub success_count: usize,
    /// Rejected rows plus rows the store refused.
    pub error_count: usize,
    pub pages_attempted: u32,
    pub pages_failed: u32,
    pub rows_seen: usize,
    pub created: usize,
    pub updated: usize,
    /// True when a short page ended the run before the page limit.
    pub stopped_early: bool,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub listing_url: String,
    pub page_param: String,
    pub max_pages: u32,
    pub rows_per_page: usize,
    pub page_delay: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            listing_url: config.source.listing_url.clone(),
            page_param: config.source.page_param.clone(),
            max_pages: config.pagination.max_pages.min(MAX_PAGES),
            rows_per_page: config.pagination.rows_per_page,
            page_delay: Duration::from_millis(config.pagination.page_delay_ms),
        }
    }
}

/// URL of listing page `page` (1-based). Page 1 is the bare listing URL.
pub fn page_url(base: &str, param: &str, page: u32) -> String {
    if page <= 1 {
        return base.to_string();
    }
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}{}={}", base, separator, param, page)
}

/// What one successfully parsed page contributed.
#[derive(Debug, Default)]
struct PageOutcome {
    rows_seen: usize,
    created: usize,
    updated: usize,
    errors: usize,
}

pub struct IngestionPipeline {
    settings: PipelineSettings,
    fetcher: PageFetcher,
    selectors: ListingSelectors,
    reconciler: Reconciler,
    logger: RunLogger,
}

impl IngestionPipeline {
    pub fn new(
        settings: PipelineSettings,
        fetcher: PageFetcher,
        selectors: ListingSelectors,
        reconciler: Reconciler,
    ) -> Self {
        Self {
            settings,
            fetcher,
            selectors,
            reconciler,
            logger: RunLogger::silent(),
        }
    }

    /// Build every stage from configuration.
    pub fn from_config(config: &AppConfig, reconciler: Reconciler) -> Result<Self, ConfigError> {
        Ok(Self::new(
            PipelineSettings::from_config(config),
            PageFetcher::new(FetchSettings::from_config(config)),
            ListingSelectors::from_config(&config.source)?,
            reconciler,
        ))
    }

    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Walk the listing until a short page or the page limit.
    pub async fn run(&self, session: &dyn BrowserSession) -> RunSummary {
        let max_pages = self.settings.max_pages.clamp(1, MAX_PAGES);
        let mut summary = RunSummary::default();

        self.logger.log_run_start(&self.settings.listing_url, max_pages);
        self.logger.start_progress(max_pages as u64).await;

        for page in 1..=max_pages {
            let url = page_url(&self.settings.listing_url, &self.settings.page_param, page);
            summary.pages_attempted += 1;
            self.logger.log_page_start(page, &url);
            self.logger.update_progress(&format!("page {}", page)).await;

            match self.process_page(session, page, &url).await {
                Ok(outcome) => {
                    summary.rows_seen += outcome.rows_seen;
                    summary.created += outcome.created;
                    summary.updated += outcome.updated;
                    summary.success_count += outcome.created + outcome.updated;
                    summary.error_count += outcome.errors;
                    self.logger.log_page_complete(
                        page,
                        outcome.rows_seen,
                        outcome.created + outcome.updated,
                        outcome.errors,
                    );

                    if outcome.rows_seen < self.settings.rows_per_page {
                        self.logger.log_last_page(page, outcome.rows_seen, self.settings.rows_per_page);
                        summary.stopped_early = page < max_pages;
                        self.logger.advance_progress().await;
                        break;
                    }
                }
                Err(e) => {
                    warn!(page, url = %url, "Page failed: {}", e);
                    self.logger.log_page_failed(page, &e.to_string());
                    summary.pages_failed += 1;
                }
            }
            self.logger.advance_progress().await;

            if page < max_pages && !self.settings.page_delay.is_zero() {
                tokio::time::sleep(self.settings.page_delay).await;
            }
        }

        info!(
            success = summary.success_count,
            errors = summary.error_count,
            pages = summary.pages_attempted,
            failed_pages = summary.pages_failed,
            "Ingestion run finished"
        );
        self.logger.record_summary(&summary);
        self.logger
            .finish_progress(&format!(
                "Run finished: {} stored, {} errors",
                summary.success_count, summary.error_count
            ))
            .await;
        summary
    }

    async fn process_page(
        &self,
        session: &dyn BrowserSession,
        page: u32,
        url: &str,
    ) -> Result<PageOutcome, PageError> {
        let markup = self.fetcher.fetch_page(session, url).await?;
        // Parsed synchronously; only owned records cross the awaits below.
        let extraction = parse_listing(&markup, &self.selectors)?;

        let mut outcome = PageOutcome {
            rows_seen: extraction.rows_seen,
            errors: extraction.rejected.len(),
            ..Default::default()
        };
        for (row, rejection) in &extraction.rejected {
            self.logger.log_row_error(page, *row, &rejection.to_string());
        }

        for record in &extraction.records {
            match self.reconciler.upsert(record).await {
                Ok(UpsertOutcome::Created) => outcome.created += 1,
                Ok(UpsertOutcome::Updated) => outcome.updated += 1,
                Err(e) => {
                    warn!(page, name = %record.name, "Store rejected record: {:#}", e);
                    self.logger.error(&format!("Failed to store {}: {:#}", record.name, e));
                    outcome.errors += 1;
                }
            }
        }

        Ok(outcome)
    }
}
