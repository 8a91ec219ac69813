//! Locates the listing table in a page snapshot and turns it into records.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

use crate::config::{AppConfig, ConfigError, SourceConfig};
use crate::extract::{extract_row, row_cells, RowRejection};
use crate::headers::{map_headers, ColumnMapping, Field};
use crate::model::ExtractedAsset;

// Safety: constant selectors with valid syntax.
static ANY_TABLE: Lazy<Selector> = Lazy::new(|| Selector::parse("table").unwrap());
static FIRST_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());

/// Page-level problems with the snapshot's table.
#[derive(Debug, Error)]
pub enum TableError {
    #[error("no listing table found (selector: {selector})")]
    TableNotFound { selector: String },

    #[error("essential columns missing: {missing:?} (headers seen: {headers:?})")]
    MissingColumns {
        missing: Vec<Field>,
        headers: Vec<String>,
    },
}

/// Compiled selectors for the listing's table, rows and header cells.
#[derive(Debug, Clone)]
pub struct ListingSelectors {
    table_css: String,
    table: Selector,
    row: Selector,
    header_cell: Selector,
}

impl ListingSelectors {
    pub fn new(table: &str, row: &str, header_cell: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            table_css: table.to_string(),
            table: parse_selector("source.table_selector", table)?,
            row: parse_selector("source.row_selector", row)?,
            header_cell: parse_selector("source.header_selector", header_cell)?,
        })
    }

    pub fn from_config(source: &SourceConfig) -> Result<Self, ConfigError> {
        Self::new(&source.table_selector, &source.row_selector, &source.header_selector)
    }
}

impl Default for ListingSelectors {
    fn default() -> Self {
        // Safety: the template's selectors are covered by test_default_config_validates.
        Self::from_config(&AppConfig::default().source).expect("default selectors must parse")
    }
}

pub(crate) fn parse_selector(field: &str, css: &str) -> Result<Selector, ConfigError> {
    Selector::parse(css).map_err(|e| ConfigError::InvalidSelector {
        field: field.to_string(),
        selector: css.to_string(),
        error: e.to_string(),
    })
}

/// Everything one page produced.
#[derive(Debug, Clone, Default)]
pub struct PageExtraction {
    /// Accepted records in row order.
    pub records: Vec<ExtractedAsset>,
    /// Data rows found in the table, accepted or not.
    pub rows_seen: usize,
    /// Rejected rows with their 1-based row number.
    pub rejected: Vec<(usize, RowRejection)>,
    pub mapping: ColumnMapping,
}

/// Parse a page snapshot into records.
///
/// Fails only on page-level problems (no table, no name/price column); bad
/// rows are collected in `rejected` and never abort the page.
pub fn parse_listing(html: &str, selectors: &ListingSelectors) -> Result<PageExtraction, TableError> {
    let document = Html::parse_document(html);

    let table = document
        .select(&selectors.table)
        .next()
        .or_else(|| document.select(&ANY_TABLE).next())
        .ok_or_else(|| TableError::TableNotFound {
            selector: selectors.table_css.clone(),
        })?;

    let (headers, header_row) = header_texts(table, selectors);
    let mapping = map_headers(&headers);
    let missing = mapping.missing_essential();
    if !missing.is_empty() {
        return Err(TableError::MissingColumns { missing, headers });
    }
    debug!("Column mapping: {:?}", mapping);

    let mut extraction = PageExtraction {
        mapping,
        ..Default::default()
    };

    let rows = table
        .select(&selectors.row)
        .filter(|row| Some(*row) != header_row)
        .filter(|row| row.children().filter_map(ElementRef::wrap).any(|c| c.value().name() == "td"));

    for (index, row) in rows.enumerate() {
        extraction.rows_seen += 1;
        match extract_row(row, &extraction.mapping) {
            Ok(record) => extraction.records.push(record),
            Err(rejection) => {
                debug!("Skipping row {}: {}", index + 1, rejection);
                extraction.rejected.push((index + 1, rejection));
            }
        }
    }

    Ok(extraction)
}

/// Header cell texts; falls back to the first row when there is no `<thead>`.
/// The fallback row is returned too so the body loop can skip it.
fn header_texts<'a>(
    table: ElementRef<'a>,
    selectors: &ListingSelectors,
) -> (Vec<String>, Option<ElementRef<'a>>) {
    let texts: Vec<String> = table
        .select(&selectors.header_cell)
        .map(|cell| cell.text().collect::<String>())
        .collect();
    if !texts.is_empty() {
        return (texts, None);
    }

    match table.select(&FIRST_ROW).next() {
        Some(row) => {
            let texts = row_cells(row)
                .into_iter()
                .map(|cell| cell.text().collect::<String>())
                .collect();
            (texts, Some(row))
        }
        None => (Vec::new(), None),
    }
}
