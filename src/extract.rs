//! Row extraction with ordered, markup-tolerant lookup strategies.
//!
//! Each output value has a static, ordered list of [`Strategy`] entries.
//! The first strategy that produces non-empty text wins. Lists put the
//! full-precision descendant first: the listing nests the exact value
//! (`$1,234,567,890`) beside an abbreviated one (`$1.23B`), and only falls
//! back to coarser lookups when that shape is absent.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Selector};
use thiserror::Error;
use tracing::trace;

use crate::headers::{ColumnMapping, Field};
use crate::model::ExtractedAsset;
use crate::normalize::{clean_text, normalize_change, parse_number, parse_rank};

/// How to pull text out of one table cell.
#[derive(Debug, Clone)]
pub enum Strategy {
    /// Text of the first descendant matching the selector.
    Text(Selector),
    /// Attribute of the first descendant matching the selector.
    Attr(Selector, &'static str),
    /// First non-empty text node directly in the cell's subtree.
    CellText,
}

impl Strategy {
    /// Apply this strategy to a cell; `None` when the shape is absent or empty.
    pub fn apply(&self, cell: ElementRef<'_>) -> Option<String> {
        let raw = match self {
            Strategy::Text(selector) => cell
                .select(selector)
                .next()
                .map(|el| el.text().collect::<String>()),
            Strategy::Attr(selector, attr) => cell
                .select(selector)
                .next()
                .and_then(|el| el.value().attr(attr))
                .map(str::to_string),
            Strategy::CellText => cell
                .text()
                .map(str::trim)
                .find(|t| !t.is_empty())
                .map(str::to_string),
        };
        raw.and_then(|text| clean_text(&text))
    }
}

/// A value the extractor reads, and the header column it lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Rank,
    Name,
    Symbol,
    DetailLink,
    Icon,
    Price,
    Change,
    MarketCap,
    Volume,
    VolumeNative,
    Supply,
    Graph,
}

impl Target {
    pub const ALL: [Target; 12] = [
        Target::Rank,
        Target::Name,
        Target::Symbol,
        Target::DetailLink,
        Target::Icon,
        Target::Price,
        Target::Change,
        Target::MarketCap,
        Target::Volume,
        Target::VolumeNative,
        Target::Supply,
        Target::Graph,
    ];

    /// Column the value is read from.
    pub fn column(&self) -> Field {
        match self {
            Target::Rank => Field::Rank,
            Target::Name | Target::Symbol | Target::DetailLink | Target::Icon => Field::Name,
            Target::Price => Field::Price,
            Target::Change => Field::Change24h,
            Target::MarketCap => Field::MarketCap,
            Target::Volume | Target::VolumeNative => Field::Volume,
            Target::Supply => Field::Supply,
            Target::Graph => Field::Graph,
        }
    }

    /// Ordered lookup strategies, most precise first.
    pub fn strategies(&self) -> &'static [Strategy] {
        match self {
            Target::Rank => &RANK,
            Target::Name => &NAME,
            Target::Symbol => &SYMBOL,
            Target::DetailLink => &DETAIL_LINK,
            Target::Icon => &ICON,
            Target::Price => &PRICE,
            Target::Change => &CHANGE,
            Target::MarketCap => &MARKET_CAP,
            Target::Volume => &VOLUME,
            Target::VolumeNative => &VOLUME_NATIVE,
            Target::Supply => &SUPPLY,
            Target::Graph => &GRAPH,
        }
    }
}

// Safety: every selector below is a compile-time constant with valid CSS
// syntax, so Selector::parse cannot fail.
fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

fn text(css: &str) -> Strategy {
    Strategy::Text(sel(css))
}

fn attr(css: &str, name: &'static str) -> Strategy {
    Strategy::Attr(sel(css), name)
}

static RANK: Lazy<Vec<Strategy>> = Lazy::new(|| vec![text("p"), text("span"), Strategy::CellText]);

static NAME: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![
        text("p.coin-item-name"),
        text("a p"),
        text("a span:nth-child(2)"),
        text("a span"),
        Strategy::CellText,
    ]
});

static SYMBOL: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![
        text("p.coin-item-symbol"),
        text(".crypto-symbol"),
        text("span.coin-item-symbol"),
    ]
});

static DETAIL_LINK: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![attr("a[href*='/currencies/']", "href"), attr("a[href]", "href")]
});

static ICON: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![attr("img.coin-logo", "src"), attr("img[src]", "src")]
});

static PRICE: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![text("div > span"), text("span"), text("p"), Strategy::CellText]
});

static CHANGE: Lazy<Vec<Strategy>> = Lazy::new(|| vec![text("span"), text("p"), Strategy::CellText]);

static MARKET_CAP: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![
        text("p > span:last-child"),
        text("p"),
        text("span"),
        Strategy::CellText,
    ]
});

static VOLUME: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![text("a > p"), text("a"), text("p"), Strategy::CellText]
});

static VOLUME_NATIVE: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![text("[data-nosnippet] p"), text("a + div p"), text("a + div")]
});

static SUPPLY: Lazy<Vec<Strategy>> = Lazy::new(|| {
    vec![
        text(".circulating-supply-value"),
        text("p"),
        text("span"),
        Strategy::CellText,
    ]
});

static GRAPH: Lazy<Vec<Strategy>> = Lazy::new(|| vec![attr("img[src]", "src")]);

static DOWN_MARKER: Lazy<Selector> = Lazy::new(|| sel("[class*='down'], [class*='Down']"));

/// Why a row did not become a record.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RowRejection {
    #[error("row has no resolvable name")]
    MissingName,

    #[error("row '{name}' has no usable price (raw: {raw:?})")]
    MissingPrice { name: String, raw: Option<String> },
}

/// Try `strategies` in order against `cell`.
pub fn resolve(cell: ElementRef<'_>, strategies: &[Strategy]) -> Option<String> {
    strategies.iter().find_map(|strategy| strategy.apply(cell))
}

/// Cells of a row in document order, ignoring cells of nested tables.
pub fn row_cells<'a>(row: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|el| matches!(el.value().name(), "td" | "th"))
        .collect()
}

/// Last non-empty path segment of a detail link: `/currencies/bitcoin/` → `bitcoin`.
pub fn slug_from_link(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next().unwrap_or("");
    path.split('/')
        .filter(|segment| !segment.is_empty())
        .last()
        .map(str::to_string)
}

/// Extract one record from a body row.
pub fn extract_row(row: ElementRef<'_>, mapping: &ColumnMapping) -> Result<ExtractedAsset, RowRejection> {
    let cells = row_cells(row);
    let read = |target: Target| -> Option<String> {
        let index = mapping.get(target.column())?;
        let cell = cells.get(index)?;
        let value = resolve(*cell, target.strategies());
        trace!(lookup = ?target, value = ?value, "resolved cell");
        value
    };

    let name = read(Target::Name).ok_or(RowRejection::MissingName)?;

    let raw_price = read(Target::Price);
    let price = raw_price
        .as_deref()
        .and_then(|raw| parse_number(raw).to_f64())
        .filter(|p| p.is_finite() && *p > 0.0)
        .ok_or_else(|| RowRejection::MissingPrice {
            name: name.clone(),
            raw: raw_price.clone(),
        })?;

    let change = mapping
        .get(Field::Change24h)
        .and_then(|index| cells.get(index))
        .and_then(|cell| {
            let raw = resolve(*cell, Target::Change.strategies())?;
            let negative = cell.select(&DOWN_MARKER).next().is_some();
            normalize_change(&raw, negative)
        });

    let number = |target: Target| -> Option<f64> {
        read(target).and_then(|raw| parse_number(&raw).to_f64())
    };

    Ok(ExtractedAsset {
        rank: read(Target::Rank).and_then(|raw| parse_rank(&raw)),
        symbol: read(Target::Symbol),
        slug: read(Target::DetailLink).and_then(|href| slug_from_link(&href)),
        icon: read(Target::Icon),
        market_cap: number(Target::MarketCap),
        volume: number(Target::Volume),
        volume_native: read(Target::VolumeNative),
        supply: read(Target::Supply),
        change,
        graph: read(Target::Graph),
        name,
        price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    static ROW: Lazy<Selector> = Lazy::new(|| sel("tr"));

    fn first_row(fragment: &str) -> Html {
        Html::parse_document(&format!("<table><tbody>{}</tbody></table>", fragment))
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::from_pairs(&[
            (Field::Rank, 0),
            (Field::Name, 1),
            (Field::Price, 2),
            (Field::Change24h, 3),
            (Field::MarketCap, 4),
            (Field::Volume, 5),
            (Field::Supply, 6),
            (Field::Graph, 7),
        ])
    }

    const FULL_ROW: &str = r#"
        <tr>
          <td><p>1</p></td>
          <td><a href="/currencies/bitcoin/" class="cmc-link"><div>
                <img class="coin-logo" src="https://img.example/1.png">
                <div><p class="coin-item-name">Bitcoin</p><div><p class="coin-item-symbol">BTC</p></div></div>
          </div></a></td>
          <td><div><span>$67,012.08</span></div></td>
          <td><span><span class="icon-Caret-down"></span>1.25%</span></td>
          <td><p><span>$1.32T</span><span>$1,320,512,330,117</span></p></td>
          <td><div><a href="/x"><p class="font_weight_500">$24,402,140,525</p></a>
                <div data-nosnippet="true"><p>435.15K BTC</p></div></div></td>
          <td><div class="circulating-supply-cell"><div class="circulating-supply-value"><span>19.8M BTC</span></div></div></td>
          <td><img src="https://img.example/sparkline/1.svg"></td>
        </tr>"#;

    #[test]
    fn test_full_row() {
        let doc = first_row(FULL_ROW);
        let row = doc.select(&ROW).next().unwrap();
        let asset = extract_row(row, &mapping()).unwrap();

        assert_eq!(asset.rank, Some(1));
        assert_eq!(asset.name, "Bitcoin");
        assert_eq!(asset.symbol.as_deref(), Some("BTC"));
        assert_eq!(asset.slug.as_deref(), Some("bitcoin"));
        assert_eq!(asset.icon.as_deref(), Some("https://img.example/1.png"));
        assert_eq!(asset.price, 67012.08);
        assert_eq!(asset.change.as_deref(), Some("-1.25"));
        assert_eq!(asset.market_cap, Some(1_320_512_330_117.0));
        assert_eq!(asset.volume, Some(24_402_140_525.0));
        assert_eq!(asset.volume_native.as_deref(), Some("435.15K BTC"));
        assert_eq!(asset.supply.as_deref(), Some("19.8M BTC"));
        assert_eq!(asset.graph.as_deref(), Some("https://img.example/sparkline/1.svg"));
    }

    #[test]
    fn test_fallback_to_less_specific_markup() {
        // Lazily rendered rows: plain spans, no paragraph wrappers.
        let doc = first_row(
            r#"<tr>
                <td>7</td>
                <td><a href="/currencies/solana/"><span></span><span>Solana</span><span class="crypto-symbol">SOL</span></a></td>
                <td>$142.50</td>
                <td>0.50%</td>
                <td>$66.1B</td>
                <td>$2.1B</td>
                <td>471,234,512 SOL</td>
                <td></td>
            </tr>"#,
        );
        let row = doc.select(&ROW).next().unwrap();
        let asset = extract_row(row, &mapping()).unwrap();

        assert_eq!(asset.rank, Some(7));
        assert_eq!(asset.name, "Solana");
        assert_eq!(asset.symbol.as_deref(), Some("SOL"));
        assert_eq!(asset.price, 142.5);
        assert_eq!(asset.change.as_deref(), Some("0.5"));
        assert_eq!(asset.market_cap, Some(66_100_000_000.0));
        assert_eq!(asset.volume, Some(2_100_000_000.0));
        assert_eq!(asset.supply.as_deref(), Some("471,234,512 SOL"));
        assert_eq!(asset.graph, None);
        assert_eq!(asset.icon, None);
    }

    #[test]
    fn test_missing_fields_do_not_block_others() {
        // Only name and price columns exist.
        let doc = first_row(r#"<tr><td><p class="coin-item-name">Ether</p></td><td><span>$3,100</span></td></tr>"#);
        let row = doc.select(&ROW).next().unwrap();
        let mapping = ColumnMapping::from_pairs(&[(Field::Name, 0), (Field::Price, 1), (Field::Supply, 9)]);
        let asset = extract_row(row, &mapping).unwrap();

        assert_eq!(asset.name, "Ether");
        assert_eq!(asset.price, 3100.0);
        assert_eq!(asset.supply, None);
        assert_eq!(asset.rank, None);
        assert_eq!(asset.slug, None);
    }

    #[test]
    fn test_rejects_missing_name() {
        let doc = first_row(r#"<tr><td>1</td><td></td><td>$1.00</td></tr>"#);
        let row = doc.select(&ROW).next().unwrap();
        let mapping = ColumnMapping::from_pairs(&[(Field::Rank, 0), (Field::Name, 1), (Field::Price, 2)]);
        assert_eq!(extract_row(row, &mapping), Err(RowRejection::MissingName));
    }

    #[test]
    fn test_rejects_zero_or_unparseable_price() {
        let mapping = ColumnMapping::from_pairs(&[(Field::Name, 0), (Field::Price, 1)]);
        for price_cell in ["<td>$0.00</td>", "<td>--</td>", "<td></td>"] {
            let doc = first_row(&format!("<tr><td>Dust</td>{}</tr>", price_cell));
            let row = doc.select(&ROW).next().unwrap();
            let result = extract_row(row, &mapping);
            assert!(
                matches!(result, Err(RowRejection::MissingPrice { .. })),
                "price cell {:?} should be rejected, got {:?}",
                price_cell,
                result
            );
        }
    }

    #[test]
    fn test_strategy_order_prefers_precise_value() {
        let doc = first_row(r#"<tr><td><p><span>$1.23B</span><span>$1,234,567,890</span></p></td></tr>"#);
        let cell = doc.select(&sel("td")).next().unwrap();
        assert_eq!(resolve(cell, Target::MarketCap.strategies()).as_deref(), Some("$1,234,567,890"));
    }

    #[test]
    fn test_every_target_has_strategies() {
        for target in Target::ALL {
            assert!(!target.strategies().is_empty(), "{:?} has no strategies", target);
        }
    }

    #[test]
    fn test_slug_from_link() {
        assert_eq!(slug_from_link("/currencies/bitcoin/"), Some("bitcoin".to_string()));
        assert_eq!(
            slug_from_link("https://coinmarketcap.com/currencies/ethereum/?ref=list#top"),
            Some("ethereum".to_string())
        );
        assert_eq!(slug_from_link("/"), None);
        assert_eq!(slug_from_link(""), None);
    }
}
