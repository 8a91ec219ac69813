use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use marketscrape::fetcher::{FetchSettings, PageFetcher, ScrollSettings};
use marketscrape::pipeline::{self, IngestionPipeline, PipelineSettings};
use marketscrape::reconcile::Reconciler;
use marketscrape::retry::RetryPolicy;
use marketscrape::store::AssetStore;
use marketscrape::table::ListingSelectors;

pub const LISTING_URL: &str = "https://listing.test/";

/// Header row of the live listing, star and trailing action columns included.
pub const STANDARD_HEADERS: [&str; 12] = [
    "",
    "#",
    "Name",
    "Price",
    "1h %",
    "24h %",
    "7d %",
    "Market Cap",
    "Volume(24h)",
    "Circulating Supply",
    "Last 7 Days",
    "",
];

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(relative)
}

pub fn load_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative))
        .unwrap_or_else(|_| panic!("Failed to load fixture: {}", relative))
}

/// URL of listing page `page` under [`LISTING_URL`].
pub fn page_url(page: u32) -> String {
    pipeline::page_url(LISTING_URL, "page", page)
}

/// Name of the generated asset ranked `rank`.
pub fn coin_name(rank: usize) -> String {
    format!("Coin {}", rank)
}

/// One body row in the live listing's layout for the asset ranked `rank`.
pub fn coin_row(rank: usize) -> String {
    let name = coin_name(rank);
    let slug = format!("coin-{}", rank);
    format!(
        r#"<tr>
            <td><span class="icon-Star"></span></td>
            <td><p>{rank}</p></td>
            <td><a href="/currencies/{slug}/"><div>
                <img class="coin-logo" src="https://img.test/{rank}.png">
                <div><p class="coin-item-name">{name}</p><div><p class="coin-item-symbol">C{rank}</p></div></div>
            </div></a></td>
            <td><div><span>${price}.50</span></div></td>
            <td><span>0.10%</span></td>
            <td><span><span class="icon-Caret-up"></span>{rank}.25%</span></td>
            <td><span>3.00%</span></td>
            <td><p><span>${cap}M</span><span>${cap},000,000</span></p></td>
            <td><div><a href="/x"><p>${volume},000</p></a></div></td>
            <td><div class="circulating-supply-value"><span>{rank}M C{rank}</span></div></td>
            <td><img src="https://img.test/sparkline/{rank}.svg"></td>
            <td></td>
        </tr>"#,
        rank = rank,
        slug = slug,
        name = name,
        price = 1000 + rank,
        cap = 5000 - rank,
        volume = 700 + rank,
    )
}

/// A listing page with the given header texts and body rows.
pub fn listing_page(headers: &[&str], rows: &[String]) -> String {
    let head: String = headers.iter().map(|h| format!("<th>{}</th>", h)).collect();
    format!(
        r#"<html><body><div class="cmc-body-content"><table class="cmc-table">
            <thead><tr>{}</tr></thead><tbody>{}</tbody></table></div></body></html>"#,
        head,
        rows.concat()
    )
}

/// Standard-layout page holding assets ranked `first..first + count`.
pub fn ranked_page(first: usize, count: usize) -> String {
    let rows: Vec<String> = (first..first + count).map(coin_row).collect();
    listing_page(&STANDARD_HEADERS, &rows)
}

pub fn pipeline_settings(max_pages: u32, rows_per_page: usize) -> PipelineSettings {
    PipelineSettings {
        listing_url: LISTING_URL.to_string(),
        page_param: "page".to_string(),
        max_pages,
        rows_per_page,
        page_delay: Duration::ZERO,
    }
}

/// Three navigation attempts with no backoff and an unpaced scroll.
pub fn fetch_settings() -> FetchSettings {
    FetchSettings {
        navigation_timeout: Duration::from_secs(60),
        ready_selector: "table tbody tr".to_string(),
        selector_timeout: Duration::from_secs(60),
        table_selector: "table.cmc-table".to_string(),
        retry: RetryPolicy::immediate(3),
        scroll: ScrollSettings {
            step_px: 250,
            interval: Duration::ZERO,
            max_steps: 60,
        },
    }
}

pub fn pipeline_with(settings: PipelineSettings, store: Arc<dyn AssetStore>) -> IngestionPipeline {
    IngestionPipeline::new(
        settings,
        PageFetcher::new(fetch_settings()),
        ListingSelectors::default(),
        Reconciler::new(store),
    )
}

pub fn pipeline(store: Arc<dyn AssetStore>, max_pages: u32, rows_per_page: usize) -> IngestionPipeline {
    pipeline_with(pipeline_settings(max_pages, rows_per_page), store)
}
