//! Header row → column mapping.
//!
//! The listing's column order is not stable (columns get added, reordered
//! or renamed between deploys), so every page re-derives where each field
//! lives from the header text instead of trusting fixed positions.

use std::collections::BTreeMap;
use std::fmt;

/// Semantic fields the extractor knows how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Rank,
    Name,
    Price,
    Change24h,
    MarketCap,
    Volume,
    Supply,
    Graph,
}

impl Field {
    /// Fields without which a row cannot become a record.
    pub const ESSENTIAL: [Field; 2] = [Field::Name, Field::Price];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Rank => "rank",
            Field::Name => "name",
            Field::Price => "price",
            Field::Change24h => "change24h",
            Field::MarketCap => "marketCap",
            Field::Volume => "volume",
            Field::Supply => "supply",
            Field::Graph => "graph",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field → zero-based column index for one page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMapping {
    columns: BTreeMap<Field, usize>,
}

impl ColumnMapping {
    pub fn get(&self, field: Field) -> Option<usize> {
        self.columns.get(&field).copied()
    }

    pub fn contains(&self, field: Field) -> bool {
        self.columns.contains_key(&field)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Field, usize)> + '_ {
        self.columns.iter().map(|(field, index)| (*field, *index))
    }

    /// The essential fields this mapping lacks; empty when the page is usable.
    pub fn missing_essential(&self) -> Vec<Field> {
        Field::ESSENTIAL
            .iter()
            .copied()
            .filter(|field| !self.contains(*field))
            .collect()
    }

    /// Build a mapping directly from pairs (tests and fixed layouts).
    pub fn from_pairs(pairs: &[(Field, usize)]) -> Self {
        Self {
            columns: pairs.iter().copied().collect(),
        }
    }
}

/// Map header cell texts to field positions.
///
/// Unrecognized headers are skipped. When two headers resolve to the same
/// field the first one wins.
pub fn map_headers<S: AsRef<str>>(cells: &[S]) -> ColumnMapping {
    let mut columns = BTreeMap::new();
    for (index, cell) in cells.iter().enumerate() {
        let key = canonical_header(cell.as_ref());
        if let Some(field) = lookup(&key) {
            columns.entry(field).or_insert(index);
        }
    }
    ColumnMapping { columns }
}

/// Lowercase, unwrap "(24h)" to "24h", drop whitespace and all punctuation
/// except `#` and `%`.
pub fn canonical_header(text: &str) -> String {
    text.chars()
        .flat_map(|c| c.to_lowercase())
        .filter(|c| c.is_alphanumeric() || *c == '#' || *c == '%')
        .collect()
}

fn lookup(key: &str) -> Option<Field> {
    let field = match key {
        "#" | "rank" => Field::Rank,
        "name" | "coin" | "asset" => Field::Name,
        "price" | "priceusd" => Field::Price,
        "24h%" | "%24h" | "24hchange" | "change24h" | "24hchange%" => Field::Change24h,
        "marketcap" | "mktcap" | "marketcapitalization" => Field::MarketCap,
        "volume24h" | "24hvolume" | "volume" => Field::Volume,
        "circulatingsupply" | "supply" => Field::Supply,
        "last7days" | "7dchart" | "chart7d" => Field::Graph,
        _ => return None,
    };
    Some(field)
}
