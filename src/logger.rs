use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Local;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::RwLock;

use crate::pipeline::RunSummary;

#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,    // Only progress bar and final summary
    Summary = 1,   // Run and page progress (default)
    Detailed = 2,  // Page failures, rejected rows
    Debug = 3,     // Everything
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }
}

/// User-facing run output: timestamped messages, a page progress bar and
/// the end-of-run summary. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RunLogger {
    verbosity: VerbosityLevel,
    progress_bar: Arc<RwLock<Option<ProgressBar>>>,
    run_metadata: Arc<Mutex<RunMetadata>>,
    log_buffer: Arc<Mutex<Vec<String>>>,
    log_file_path: Option<String>,
    /// Set once the log file has been truncated by this process.
    log_file_opened: Arc<AtomicBool>,
}

#[derive(Default, Clone)]
struct RunMetadata {
    started: Option<Instant>,
    finished: Option<Instant>,
    listing_url: String,
    summary: Option<RunSummary>,
}

impl RunLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Arc::new(RwLock::new(None)),
            run_metadata: Arc::new(Mutex::new(RunMetadata::default())),
            log_buffer: Arc::new(Mutex::new(Vec::new())),
            log_file_path: None,
            log_file_opened: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: String) -> Self {
        Self {
            log_file_path: Some(log_file_path),
            ..Self::new(verbosity)
        }
    }

    /// Logger for tests and library callers: nothing but errors.
    pub fn silent() -> Self {
        Self::new(VerbosityLevel::Silent)
    }

    pub fn verbosity(&self) -> VerbosityLevel {
        self.verbosity
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    pub fn error(&self, message: &str) {
        // Errors are shown at every verbosity
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = format!("[{}] {}: {}", Local::now().format("%H:%M:%S%.3f"), level, message);

        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(msg.clone());
            }
        }

        // Print above an active progress bar instead of through it
        if let Ok(guard) = self.progress_bar.try_read() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }

        eprintln!("{}", msg);
    }

    pub async fn start_progress(&self, total_pages: u64) {
        // indicatif stays invisible when stderr is not a terminal
        let pb = ProgressBar::new(total_pages);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40.cyan/blue}] page {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        pb.set_message("Starting...");

        *self.progress_bar.write().await = Some(pb);

        if let Ok(mut metadata) = self.run_metadata.lock() {
            metadata.started = Some(Instant::now());
        }
    }

    pub async fn update_progress(&self, message: &str) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.set_message(message.to_string());
        }
    }

    pub async fn advance_progress(&self) {
        if let Some(pb) = self.progress_bar.read().await.as_ref() {
            pb.inc(1);
        }
    }

    pub async fn finish_progress(&self, final_message: &str) {
        if let Some(pb) = self.progress_bar.write().await.take() {
            pb.finish_and_clear();
        }

        if let Ok(mut metadata) = self.run_metadata.lock() {
            metadata.finished = Some(Instant::now());
        }

        self.info(final_message);
    }

    pub fn record_summary(&self, summary: &RunSummary) {
        if let Ok(mut metadata) = self.run_metadata.lock() {
            metadata.summary = Some(summary.clone());
        }
    }

    pub fn log_run_start(&self, listing_url: &str, max_pages: u32) {
        if let Ok(mut metadata) = self.run_metadata.lock() {
            metadata.listing_url = listing_url.to_string();
        }
        self.info(&format!("Starting ingestion run: {} (up to {} pages)", listing_url, max_pages));
    }

    pub fn log_page_start(&self, page: u32, url: &str) {
        self.debug(&format!("Fetching page {}: {}", page, url));
    }

    pub fn log_page_complete(&self, page: u32, rows_seen: usize, accepted: usize, errors: usize) {
        if errors > 0 {
            self.info(&format!(
                "Page {}: {} rows, {} stored, {} errors",
                page, rows_seen, accepted, errors
            ));
        } else {
            self.info(&format!("Page {}: {} rows, {} stored", page, rows_seen, accepted));
        }
    }

    pub fn log_page_failed(&self, page: u32, error: &str) {
        self.warn(&format!("Page {} skipped: {}", page, error));
    }

    pub fn log_row_error(&self, page: u32, row: usize, error: &str) {
        self.debug(&format!("Page {} row {}: {}", page, row, error));
    }

    pub fn log_last_page(&self, page: u32, rows_seen: usize, expected: usize) {
        self.info(&format!(
            "Page {} had {} of {} rows; treating it as the last page",
            page, rows_seen, expected
        ));
    }

    pub fn log_run_skipped(&self) {
        self.info("Previous run still in progress; skipping this trigger");
    }

    /// End-of-run summary on stdout, printed at every verbosity.
    pub fn print_final_summary(&self) {
        let metadata = match self.run_metadata.lock() {
            Ok(metadata) => metadata.clone(),
            Err(_) => return,
        };

        let mut out = io::stdout().lock();
        let _ = write!(out, "\x1b[2K\r");
        let _ = writeln!(out, "\n=== INGESTION SUMMARY ===");

        if let (Some(start), Some(end)) = (metadata.started, metadata.finished) {
            let _ = writeln!(out, "Run Duration: {:.2}s", end.duration_since(start).as_secs_f64());
        }
        if !metadata.listing_url.is_empty() {
            let _ = writeln!(out, "Listing: {}", metadata.listing_url);
        }

        if let Some(summary) = &metadata.summary {
            let _ = writeln!(out, "Pages Attempted: {}", summary.pages_attempted);
            let _ = writeln!(out, "Pages Failed: {}", summary.pages_failed);
            let _ = writeln!(out, "Rows Seen: {}", summary.rows_seen);
            let _ = writeln!(out, "Records Stored: {} ({} created, {} updated)", summary.success_count, summary.created, summary.updated);
            let _ = writeln!(out, "Row Errors: {}", summary.error_count);
            let _ = writeln!(
                out,
                "Stopped On: {}",
                if summary.stopped_early { "short page" } else { "page limit" }
            );
        }
        let _ = writeln!(out, "=========================\n");
        let _ = out.flush();
    }

    /// Move buffered messages to the `--log-file` path, if one was given.
    ///
    /// The first export of a process truncates the file, later ones append,
    /// so a scheduler can flush after every run without the buffer growing.
    pub fn export_logs(&self) -> io::Result<()> {
        let Some(ref log_file_path) = self.log_file_path else {
            return Ok(());
        };
        let entries = match self.log_buffer.lock() {
            Ok(mut buffer) => std::mem::take(&mut *buffer),
            Err(_) => return Ok(()),
        };

        if let Some(parent) = Path::new(log_file_path).parent() {
            std::fs::create_dir_all(parent)?;
        }

        let first_export = !self.log_file_opened.swap(true, Ordering::SeqCst);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(first_export)
            .append(!first_export)
            .open(log_file_path)?;

        for log_entry in entries.iter() {
            writeln!(file, "{}", log_entry)?;
        }

        file.flush()
    }

    pub fn is_log_export_enabled(&self) -> bool {
        self.log_file_path.is_some()
    }

    pub fn get_log_count(&self) -> usize {
        self.log_buffer.lock().map(|buffer| buffer.len()).unwrap_or(0)
    }
}
