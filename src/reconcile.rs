//! Upsert of extracted rows into the asset store.
//!
//! A field that could not be resolved this run (`None`) never clears what
//! is stored; only price is always replaced, since a row without a price
//! never reaches this point.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{AssetRecord, ExtractedAsset};
use crate::normalize::slugify;
use crate::store::AssetStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

pub struct Reconciler {
    store: Arc<dyn AssetStore>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// Create the record for `extracted.name`, or merge into the stored one.
    pub async fn upsert(&self, extracted: &ExtractedAsset) -> Result<UpsertOutcome> {
        let now = Utc::now();
        match self.store.find_by_name(&extracted.name).await? {
            Some(mut existing) => {
                merge_into(&mut existing, extracted, now);
                self.store.update(&existing).await?;
                debug!(name = %extracted.name, "Updated asset");
                Ok(UpsertOutcome::Updated)
            }
            None => {
                let record = new_record(extracted, now);
                self.store.insert(&record).await?;
                debug!(name = %extracted.name, slug = %record.slug, "Created asset");
                Ok(UpsertOutcome::Created)
            }
        }
    }
}

/// A first-seen record; the slug is synthesized from the name when the row
/// had no detail link.
pub fn new_record(extracted: &ExtractedAsset, now: DateTime<Utc>) -> AssetRecord {
    AssetRecord {
        rank: extracted.rank.unwrap_or(0),
        name: extracted.name.clone(),
        symbol: extracted.symbol.clone().unwrap_or_default(),
        slug: extracted
            .slug
            .clone()
            .unwrap_or_else(|| slugify(&extracted.name)),
        icon: extracted.icon.clone(),
        price: extracted.price,
        market_cap: extracted.market_cap.unwrap_or(0.0),
        volume: extracted.volume.unwrap_or(0.0),
        volume_native: extracted.volume_native.clone(),
        supply: extracted.supply.clone().unwrap_or_default(),
        change: extracted.change.clone().unwrap_or_default(),
        graph: extracted.graph.clone().unwrap_or_default(),
        created_at: now,
        updated_at: now,
    }
}

/// Overwrite every field this extraction resolved; keep the rest.
pub fn merge_into(existing: &mut AssetRecord, extracted: &ExtractedAsset, now: DateTime<Utc>) {
    fn keep<T: Clone>(slot: &mut T, fresh: &Option<T>) {
        if let Some(value) = fresh {
            *slot = value.clone();
        }
    }

    keep(&mut existing.rank, &extracted.rank);
    keep(&mut existing.symbol, &extracted.symbol);
    keep(&mut existing.slug, &extracted.slug);
    keep(&mut existing.market_cap, &extracted.market_cap);
    keep(&mut existing.volume, &extracted.volume);
    keep(&mut existing.supply, &extracted.supply);
    keep(&mut existing.change, &extracted.change);
    keep(&mut existing.graph, &extracted.graph);
    if extracted.icon.is_some() {
        existing.icon = extracted.icon.clone();
    }
    if extracted.volume_native.is_some() {
        existing.volume_native = extracted.volume_native.clone();
    }
    if existing.slug.is_empty() {
        existing.slug = slugify(&existing.name);
    }

    existing.price = extracted.price;
    existing.updated_at = now;
}
