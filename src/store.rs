//! Persistent asset store.
//!
//! The reconciler only needs lookup by name plus insert/update; the CLI
//! read side adds ranked listing, slug lookup and count. Records are stored
//! as JSON documents keyed by name.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::model::AssetRecord;

#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn find_by_name(&self, name: &str) -> Result<Option<AssetRecord>>;

    /// Insert a record whose name is not stored yet.
    async fn insert(&self, record: &AssetRecord) -> Result<()>;

    /// Replace the stored record with the same name.
    async fn update(&self, record: &AssetRecord) -> Result<()>;

    /// Records ordered by rank (unranked last, then market cap descending).
    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<AssetRecord>>;

    async fn find_by_slug(&self, slug: &str) -> Result<Option<AssetRecord>>;

    async fn count(&self) -> Result<usize>;
}

/// Listing order shared by every store.
pub fn listing_order(a: &AssetRecord, b: &AssetRecord) -> Ordering {
    let unranked = |r: &AssetRecord| !r.has_rank();
    unranked(a)
        .cmp(&unranked(b))
        .then_with(|| a.rank.cmp(&b.rank))
        .then_with(|| b.market_cap.partial_cmp(&a.market_cap).unwrap_or(Ordering::Equal))
        .then_with(|| a.name.cmp(&b.name))
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS assets (
    name TEXT PRIMARY KEY,
    slug TEXT NOT NULL,
    rank INTEGER NOT NULL DEFAULT 0,
    market_cap REAL NOT NULL DEFAULT 0,
    document TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS assets_slug ON assets (slug);
CREATE INDEX IF NOT EXISTS assets_rank ON assets (rank);
";

/// SQLite-backed store, one JSON document per asset.
#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    connection: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database parent directory {}", parent.display())
            })?;
        }

        let connection = Connection::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        connection
            .execute_batch(SCHEMA_SQL)
            .context("failed to initialize asset schema")?;

        debug!("Opened asset store at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let connection = Connection::open_in_memory().context("failed to open in-memory sqlite")?;
        connection
            .execute_batch(SCHEMA_SQL)
            .context("failed to initialize asset schema")?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run a statement off the async runtime.
    async fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let guard = connection
                .lock()
                .map_err(|_| anyhow!("asset store connection lock poisoned"))?;
            f(&guard)
        })
        .await
        .map_err(|e| anyhow!("Blocking task panicked: {}", e))?
    }
}

fn decode(document: String) -> Result<AssetRecord> {
    serde_json::from_str(&document).context("failed to decode asset document")
}

fn encode(record: &AssetRecord) -> Result<String> {
    serde_json::to_string(record).with_context(|| format!("failed to encode asset {}", record.name))
}

#[async_trait]
impl AssetStore for SqliteStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<AssetRecord>> {
        let name = name.to_string();
        self.with_connection(move |connection| {
            let document: Option<String> = connection
                .query_row(
                    "SELECT document FROM assets WHERE name = ?1",
                    [&name],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| format!("failed to look up asset {name}"))?;
            document.map(decode).transpose()
        })
        .await
    }

    async fn insert(&self, record: &AssetRecord) -> Result<()> {
        let record = record.clone();
        self.with_connection(move |connection| {
            let document = encode(&record)?;
            connection
                .execute(
                    "INSERT INTO assets (name, slug, rank, market_cap, document, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        record.name,
                        record.slug,
                        record.rank,
                        record.market_cap,
                        document,
                        record.updated_at.to_rfc3339()
                    ],
                )
                .with_context(|| format!("failed to insert asset {}", record.name))?;
            Ok(())
        })
        .await
    }

    async fn update(&self, record: &AssetRecord) -> Result<()> {
        let record = record.clone();
        self.with_connection(move |connection| {
            let document = encode(&record)?;
            let changed = connection
                .execute(
                    "UPDATE assets
                     SET slug = ?2, rank = ?3, market_cap = ?4, document = ?5, updated_at = ?6
                     WHERE name = ?1",
                    params![
                        record.name,
                        record.slug,
                        record.rank,
                        record.market_cap,
                        document,
                        record.updated_at.to_rfc3339()
                    ],
                )
                .with_context(|| format!("failed to update asset {}", record.name))?;
            if changed == 0 {
                bail!("no stored asset named {}", record.name);
            }
            Ok(())
        })
        .await
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<AssetRecord>> {
        self.with_connection(move |connection| {
            let mut statement = connection
                .prepare(
                    "SELECT document FROM assets
                     ORDER BY CASE WHEN rank = 0 THEN 1 ELSE 0 END, rank ASC, market_cap DESC, name ASC
                     LIMIT ?1 OFFSET ?2",
                )
                .context("failed to prepare asset listing query")?;
            let rows = statement
                .query_map(params![limit as i64, offset as i64], |row| row.get::<_, String>(0))
                .context("failed to run asset listing query")?;

            let mut out = Vec::new();
            for row in rows {
                let document = row.context("failed to decode asset row")?;
                out.push(decode(document)?);
            }
            Ok(out)
        })
        .await
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<AssetRecord>> {
        let slug = slug.to_string();
        self.with_connection(move |connection| {
            let document: Option<String> = connection
                .query_row(
                    "SELECT document FROM assets WHERE slug = ?1 ORDER BY name LIMIT 1",
                    [&slug],
                    |row| row.get(0),
                )
                .optional()
                .with_context(|| format!("failed to look up slug {slug}"))?;
            document.map(decode).transpose()
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_connection(|connection| {
            let count: i64 = connection
                .query_row("SELECT COUNT(*) FROM assets", [], |row| row.get(0))
                .context("failed to count assets")?;
            Ok(count as usize)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store keyed by name.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<HashMap<String, AssetRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> std::sync::MutexGuard<'_, HashMap<String, AssetRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AssetStore for MemoryStore {
    async fn find_by_name(&self, name: &str) -> Result<Option<AssetRecord>> {
        Ok(self.records().get(name).cloned())
    }

    async fn insert(&self, record: &AssetRecord) -> Result<()> {
        let mut records = self.records();
        if records.contains_key(&record.name) {
            bail!("asset {} already stored", record.name);
        }
        records.insert(record.name.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &AssetRecord) -> Result<()> {
        let mut records = self.records();
        match records.get_mut(&record.name) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => bail!("no stored asset named {}", record.name),
        }
    }

    async fn list(&self, offset: usize, limit: usize) -> Result<Vec<AssetRecord>> {
        let mut all: Vec<AssetRecord> = self.records().values().cloned().collect();
        all.sort_by(listing_order);
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn find_by_slug(&self, slug: &str) -> Result<Option<AssetRecord>> {
        let records = self.records();
        let mut matches: Vec<&AssetRecord> = records.values().filter(|r| r.slug == slug).collect();
        matches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(matches.first().map(|r| (*r).clone()))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records().len())
    }
}
