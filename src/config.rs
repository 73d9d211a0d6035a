//! Configuration for cratedig paths and download behavior.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CRATEDIG_HOME, CRATEDIG_LIBRARY)
//! 2. Config file (.cratedig/config.yaml)
//! 3. Defaults (~/.cratedig)
//!
//! Config file discovery:
//! - Searches current directory and parents for .cratedig/config.yaml
//! - Paths in config file are relative to the config file's parent directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub downloads: Option<DownloadsConfig>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to config file)
    pub home: Option<String>,
    /// Library directory (relative to config file)
    pub library: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadsConfig {
    pub max_concurrent: Option<usize>,
    pub fetch_timeout_seconds: Option<u64>,
    pub audio_format: Option<String>,
    pub ytdlp_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to cratedig home (engine state)
    pub home: PathBuf,
    /// Absolute path to the library root (media/ and tmp/ live under it)
    pub library: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    /// Download settings
    pub downloads: DownloadSettings,
}

/// Download orchestrator settings
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    /// Maximum simultaneous downloading/tagging jobs
    pub max_concurrent: usize,
    /// Timeout for a single fetch attempt
    pub fetch_timeout: Duration,
    /// Target audio format for extracted payloads
    pub audio_format: String,
    /// yt-dlp binary (name or absolute path)
    pub ytdlp_path: String,
    /// Retry behavior for transient source failures
    pub retry: RetrySettings,
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            fetch_timeout: Duration::from_secs(600),
            audio_format: "mp3".to_string(),
            ytdlp_path: "yt-dlp".to_string(),
            retry: RetrySettings::default(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30000,
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".cratedig").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Build download settings from the optional config file sections
fn resolve_downloads(config: Option<&ConfigFile>) -> DownloadSettings {
    let mut settings = DownloadSettings::default();

    if let Some(downloads) = config.and_then(|c| c.downloads.as_ref()) {
        if let Some(max) = downloads.max_concurrent {
            settings.max_concurrent = max.max(1);
        }
        if let Some(secs) = downloads.fetch_timeout_seconds {
            settings.fetch_timeout = Duration::from_secs(secs);
        }
        if let Some(ref format) = downloads.audio_format {
            settings.audio_format = format.clone();
        }
        if let Some(ref path) = downloads.ytdlp_path {
            settings.ytdlp_path = path.clone();
        }
    }

    if let Some(retry) = config.and_then(|c| c.retry.as_ref()) {
        if let Some(attempts) = retry.max_attempts {
            settings.retry.max_attempts = attempts.max(1);
        }
        if let Some(ms) = retry.initial_delay_ms {
            settings.retry.initial_delay_ms = ms;
        }
        if let Some(ms) = retry.max_delay_ms {
            settings.retry.max_delay_ms = ms;
        }
    }

    settings
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    // Default home directory
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".cratedig");

    // Check for config file
    let config_file = find_config_file();

    let (home, library, downloads) = if let Some(ref config_path) = config_file {
        // Config file found - use it as base
        let config = load_config_file(config_path)?;

        // Base directory is the parent of .cratedig/ (i.e., grandparent of config.yaml)
        let base_dir = config_path
            .parent() // .cratedig/
            .and_then(|p| p.parent()) // project root
            .unwrap_or(Path::new("."));

        // Resolve home path
        let home = if let Ok(env_home) = std::env::var("CRATEDIG_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            // home is relative to .cratedig/ directory
            let cratedig_dir = config_path.parent().unwrap_or(Path::new("."));
            resolve_path(cratedig_dir, home_path)
        } else {
            default_home.clone()
        };

        // Resolve library path
        let library = if let Ok(env_lib) = std::env::var("CRATEDIG_LIBRARY") {
            PathBuf::from(env_lib)
        } else if let Some(ref lib_path) = config.paths.library {
            resolve_path(base_dir, lib_path)
        } else {
            home.join("library")
        };

        let downloads = resolve_downloads(Some(&config));

        (home, library, downloads)
    } else {
        // No config file - use env vars or defaults
        let home = std::env::var("CRATEDIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let library = std::env::var("CRATEDIG_LIBRARY")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("library"));

        (home, library, resolve_downloads(None))
    };

    Ok(ResolvedConfig {
        home,
        library,
        config_file,
        downloads,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

// ============================================================================
// Convenience functions
// ============================================================================

/// Get the cratedig home directory (engine state).
pub fn cratedig_home() -> Result<PathBuf> {
    Ok(config()?.home.clone())
}

/// Get the library root directory.
pub fn library_dir() -> Result<PathBuf> {
    Ok(config()?.library.clone())
}
