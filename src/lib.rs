pub mod browser;
pub mod cli;
pub mod config;
pub mod extract;
pub mod fetcher;
pub mod format;
pub mod headers;
pub mod logger;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod store;
pub mod table;
pub mod testing;

pub use browser::{BrowserSession, ChromeSession};
pub use model::{AssetRecord, ExtractedAsset};
pub use pipeline::{IngestionPipeline, RunSummary};
pub use scheduler::{RunLock, Scheduler, TriggerOutcome};
pub use store::{AssetStore, MemoryStore, SqliteStore};
