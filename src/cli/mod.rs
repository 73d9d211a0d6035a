//! Command-line interface for cratedig.
//!
//! Provides commands for acquiring media, inspecting job status,
//! listing and searching the library, streaming committed items, and
//! reconciling the on-disk state.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::core::Orchestrator;
use crate::domain::{ItemId, JobState, TagPatch};
use crate::library::{LibraryIndex, LibraryWatcher, ProcessLock, StorageLayout};
use crate::stream::{ByteRange, StreamService};

/// cratedig - media acquisition and library pipeline daemon
#[derive(Parser, Debug)]
#[command(name = "cratedig")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch a locator into the library and wait for it to commit
    Fetch {
        /// URL or search expression for the external source
        locator: String,

        /// Override the title written into the tags
        #[arg(long)]
        title: Option<String>,

        /// Override the artist written into the tags
        #[arg(long)]
        artist: Option<String>,

        /// Override the album written into the tags
        #[arg(long)]
        album: Option<String>,
    },

    /// Show the job or item status for an identity
    Status {
        /// Item identity (16 hex chars) or the original locator
        identity: String,
    },

    /// List committed items in commit order
    List {
        /// Maximum number of items to show
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },

    /// Search committed items by title or artist
    Search {
        /// Search query
        query: String,
    },

    /// Stream a committed item's bytes
    Stream {
        /// Item identity (16 hex chars) or the original locator
        identity: String,

        /// Byte range, e.g. "0-499", "500-" or "bytes=-200"
        #[arg(short, long)]
        range: Option<String>,

        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rescan the media directory and repair the index
    Reconcile,

    /// Watch the media directory and reconcile on changes
    Watch,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Fetch {
                locator,
                title,
                artist,
                album,
            } => fetch(&locator, title, artist, album).await,
            Commands::Status { identity } => show_status(&identity).await,
            Commands::List { limit } => list_library(limit).await,
            Commands::Search { query } => search_library(&query).await,
            Commands::Stream {
                identity,
                range,
                output,
            } => stream_item(&identity, range, output).await,
            Commands::Reconcile => reconcile().await,
            Commands::Watch => watch().await,
            Commands::Config => show_config().await,
        }
    }
}

/// Accept either a bare identity or the locator it was derived from
fn resolve_identity(arg: &str) -> ItemId {
    ItemId::from_file_stem(arg).unwrap_or_else(|| ItemId::from_locator(arg))
}

/// Open the library read-only (no process lock)
async fn open_library() -> Result<Arc<LibraryIndex>> {
    let config = crate::config::config()?;
    let layout = Arc::new(StorageLayout::new(config.library.clone()));
    Ok(Arc::new(LibraryIndex::open(layout).await?))
}

/// Open the library for mutation, holding the exclusive process lock
async fn open_library_locked() -> Result<(Arc<LibraryIndex>, ProcessLock)> {
    let config = crate::config::config()?;
    let layout = Arc::new(StorageLayout::new(config.library.clone()));
    let lock = layout.acquire_lock()?;
    let index = Arc::new(LibraryIndex::open(layout).await?);
    Ok((index, lock))
}

/// Fetch a locator and wait for the terminal job state
async fn fetch(
    locator: &str,
    title: Option<String>,
    artist: Option<String>,
    album: Option<String>,
) -> Result<()> {
    let (index, _lock) = open_library_locked().await?;

    let config = crate::config::config()?;
    let orchestrator = Orchestrator::with_default_sources(index.clone(), config.downloads.clone());

    let overrides = TagPatch {
        title,
        artist,
        album,
    };

    let mut handle = orchestrator
        .submit(locator, overrides)
        .await
        .context("Submission rejected")?;

    eprintln!("[{} submitted as {}]", locator, handle.id());

    match handle.wait().await {
        JobState::Ready => {
            let item = index
                .lookup(handle.id())
                .await
                .context("Job finished but item is missing from the index")?;

            println!("{}", item.id);
            eprintln!(
                "[ready: \"{}\" by {} ({} bytes, {})]",
                item.title,
                item.artist.as_deref().unwrap_or("unknown"),
                item.size_bytes,
                item.format
            );
            Ok(())
        }
        JobState::Failed { kind, message } => {
            eprintln!("[failed ({}): {}]", kind, message);
            std::process::exit(1);
        }
        JobState::Cancelled => {
            eprintln!("[cancelled]");
            std::process::exit(1);
        }
        state => {
            eprintln!("[unexpected terminal state: {}]", state);
            std::process::exit(1);
        }
    }
}

/// Show job state or committed item for an identity
async fn show_status(identity: &str) -> Result<()> {
    let id = resolve_identity(identity);
    let index = open_library().await?;

    // Short-lived CLI invocations hold no job memory; jobs only exist
    // inside a running fetch/serve process, so status resolves from
    // the committed library here
    match index.lookup(&id).await {
        Some(item) => {
            println!("Identity: {}", item.id);
            println!("Title: {}", item.title);
            if let Some(ref artist) = item.artist {
                println!("Artist: {}", artist);
            }
            if let Some(duration) = item.duration_secs {
                println!("Duration: {}s", duration);
            }
            println!("Format: {}", item.format);
            println!("Size: {} bytes", item.size_bytes);
            println!("Path: {}", item.storage_path.display());
            println!("Committed: {}", item.committed_at);
            Ok(())
        }
        None => {
            eprintln!("[{} not found]", id);
            std::process::exit(1);
        }
    }
}

/// Render one library row
fn print_item_row(item: &crate::domain::Item) {
    let duration = item
        .duration_secs
        .map(|d| format!("{}:{:02}", d / 60, d % 60))
        .unwrap_or_else(|| "-".to_string());

    println!(
        "{}  {:<40}  {:<24}  {:>6}  {:>10}",
        item.id,
        truncate(&item.title, 40),
        truncate(item.artist.as_deref().unwrap_or("-"), 24),
        duration,
        item.size_bytes,
    );
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}

/// List committed items
async fn list_library(limit: usize) -> Result<()> {
    let index = open_library().await?;
    let items = index.list().await;

    if items.is_empty() {
        println!("Library is empty");
        return Ok(());
    }

    for item in items.iter().take(limit) {
        print_item_row(item);
    }
    if items.len() > limit {
        eprintln!("[{} more not shown]", items.len() - limit);
    }

    Ok(())
}

/// Search committed items
async fn search_library(query: &str) -> Result<()> {
    let index = open_library().await?;
    let items = index.search(query).await;

    if items.is_empty() {
        println!("No matches for '{}'", query);
        return Ok(());
    }

    for item in &items {
        print_item_row(item);
    }

    Ok(())
}

/// Stream a committed item to stdout or a file
async fn stream_item(identity: &str, range: Option<String>, output: Option<PathBuf>) -> Result<()> {
    let id = resolve_identity(identity);
    let index = open_library().await?;
    let service = StreamService::new(index);

    let range = match range {
        Some(ref spec) => {
            let header = if spec.starts_with("bytes=") {
                spec.clone()
            } else {
                format!("bytes={}", spec)
            };
            Some(
                ByteRange::parse_header(&header)
                    .with_context(|| format!("Unparseable range '{}'", spec))?,
            )
        }
        None => None,
    };

    let mut stream = match service.open(&id, range).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("[{}]", e);
            std::process::exit(1);
        }
    };

    eprintln!(
        "[{} {} bytes{}]",
        stream.content_type,
        stream.content_length,
        stream
            .content_range_header()
            .map(|r| format!(", {}", r))
            .unwrap_or_default()
    );

    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            tokio::io::copy(&mut stream, &mut file).await?;
        }
        None => {
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut stream, &mut stdout).await?;
        }
    }

    Ok(())
}

/// One-shot reconcile pass
async fn reconcile() -> Result<()> {
    let (index, _lock) = open_library_locked().await?;

    let report = index.reconcile().await?;
    println!(
        "Reconciled: {} recovered, {} pruned, {} skipped ({} items total)",
        report.recovered,
        report.pruned,
        report.skipped,
        index.len().await
    );

    Ok(())
}

/// Watch the media directory until interrupted
async fn watch() -> Result<()> {
    let (index, _lock) = open_library_locked().await?;

    let watcher = LibraryWatcher::new();
    let (mut reports, handle) = watcher.watch(index).await?;

    eprintln!("[watching; ctrl-c to stop]");

    loop {
        tokio::select! {
            report = reports.recv() => match report {
                Some(report) => println!(
                    "Reconciled: {} recovered, {} pruned, {} skipped",
                    report.recovered, report.pruned, report.skipped
                ),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    handle.stop().await?;
    Ok(())
}

/// Show resolved configuration
async fn show_config() -> Result<()> {
    let config = crate::config::config()?;

    println!("Home: {}", config.home.display());
    println!("Library: {}", config.library.display());
    match &config.config_file {
        Some(path) => println!("Config file: {}", path.display()),
        None => println!("Config file: (none found)"),
    }
    println!("Max concurrent downloads: {}", config.downloads.max_concurrent);
    println!("Fetch timeout: {:?}", config.downloads.fetch_timeout);
    println!("Audio format: {}", config.downloads.audio_format);
    println!("yt-dlp binary: {}", config.downloads.ytdlp_path);
    println!(
        "Retry: {} attempts, {}ms initial delay, {}ms cap",
        config.downloads.retry.max_attempts,
        config.downloads.retry.initial_delay_ms,
        config.downloads.retry.max_delay_ms
    );

    Ok(())
}
