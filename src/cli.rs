use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "marketscrape")]
#[command(about = "Scheduled ingestion of a paginated market-cap listing into a local asset store")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Create default configuration file at ./config/marketscrape.toml
    #[arg(long, global = true)]
    pub init: bool,

    /// Configuration file (defaults to ./config/marketscrape.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<String>,

    /// Verbose logging (use -v for page warnings, -vv for row details)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export run messages to a file (specify file path)
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<String>,

    /// Maximum pages per run (overrides config, capped at 100)
    #[arg(long, global = true, value_name = "PAGES")]
    pub max_pages: Option<u32>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run one ingestion pass now
    Run,

    /// Run now, then again every configured interval until Ctrl-C
    Schedule,

    /// List stored assets ordered by rank
    List {
        /// Number of records to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Maximum number of records to show
        #[arg(long, default_value = "100")]
        limit: usize,

        /// Currency code used for the price symbol
        #[arg(long, default_value = "USD")]
        currency: String,
    },

    /// Show one stored asset as JSON
    Show {
        /// Asset slug, e.g. "bitcoin"
        slug: String,
    },
}
