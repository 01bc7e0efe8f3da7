//! Configuration management.
//!
//! Settings come from a config file (JSON, TOML or YAML), overridden by
//! environment variables. Batch knobs also honour their dedicated
//! environment names so deployments can tune them without a config file.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "retriever.db";

/// Batch accumulation and scheduling knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Size cap per job in bytes.
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: u64,
    /// Quiescence before the open job is force-rolled, in seconds.
    #[serde(default = "default_idle_seconds")]
    pub idle_seconds: u64,
    /// Scheduler period in seconds.
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Model identifier sent with every batch.
    #[serde(default = "default_provider_model")]
    pub provider_model: String,
    /// Per-call deadline for provider operations, in seconds.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout: u64,
    /// Per-call deadline for store operations, in seconds.
    #[serde(default = "default_store_timeout")]
    pub store_timeout: u64,
}

fn default_max_batch_bytes() -> u64 {
    1024 * 1024 * 1024
}
fn default_idle_seconds() -> u64 {
    120
}
fn default_tick_seconds() -> u64 {
    60
}
fn default_provider_model() -> String {
    "gemini-2.5-flash".to_string()
}
fn default_provider_timeout() -> u64 {
    60
}
fn default_store_timeout() -> u64 {
    10
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            max_batch_bytes: default_max_batch_bytes(),
            idle_seconds: default_idle_seconds(),
            tick_seconds: default_tick_seconds(),
            provider_model: default_provider_model(),
            provider_timeout: default_provider_timeout(),
            store_timeout: default_store_timeout(),
        }
    }
}

impl BatchSettings {
    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_seconds)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout)
    }

    /// Apply the dedicated environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_u64("MAX_BATCH_BYTES") {
            self.max_batch_bytes = v;
        }
        if let Some(v) = env_u64("IDLE_SECONDS") {
            self.idle_seconds = v;
        }
        if let Some(v) = env_u64("TICK_SECONDS") {
            self.tick_seconds = v;
        }
        if let Some(v) = env_str("PROVIDER_MODEL") {
            self.provider_model = v;
        }
        if let Some(v) = env_u64("PROVIDER_TIMEOUT") {
            self.provider_timeout = v;
        }
        if let Some(v) = env_u64("STORE_TIMEOUT") {
            self.store_timeout = v;
        }
        self
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_str(name).and_then(|s| s.parse().ok())
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename.
    pub database_filename: String,
    /// Database URL (overrides data_dir/database_filename if set).
    /// Supports sqlite: URLs. Set via DATABASE_URL env var or config.
    pub database_url: Option<String>,
    /// User agent for HTTP requests.
    pub user_agent: String,
    /// Crawl request timeout in seconds.
    pub request_timeout: u64,
    /// Delay between crawl requests in milliseconds.
    pub request_delay_ms: u64,
    /// Worker queue broker URL (None = in-process, "amqp://..." = RabbitMQ).
    pub broker_url: Option<String>,
    /// Channel ingestion service URL (None = channel tasks fail soft).
    pub channel_service_url: Option<String>,
    /// Batch accumulation and scheduling knobs.
    pub batch: BatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        // Default to ~/Documents/retriever/ for user data
        // Falls back gracefully: Documents dir -> Home dir -> Current dir
        let data_dir = dirs::document_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("retriever");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_url: None,
            user_agent: "Retriever/0.1 (research)".to_string(),
            request_timeout: 30,
            request_delay_ms: 500,
            broker_url: None,
            channel_service_url: None,
            batch: BatchSettings::default(),
        }
    }
}

impl Settings {
    /// Resolve the database file path.
    ///
    /// Only sqlite URLs are supported; anything else falls back to the
    /// data-dir path.
    pub fn database_path(&self) -> PathBuf {
        if let Some(url) = &self.database_url {
            if let Some(path) = url.strip_prefix("sqlite:") {
                return PathBuf::from(path.trim_start_matches("//"));
            }
            tracing::warn!("Unsupported DATABASE_URL scheme, using the data directory instead");
        }
        self.data_dir.join(&self.database_filename)
    }

    /// Whether the database file already exists.
    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// User agent string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Crawl request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout: Option<u64>,
    /// Delay between crawl requests in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_delay_ms: Option<u64>,
    /// Worker queue broker URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broker_url: Option<String>,
    /// Channel ingestion service URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_service_url: Option<String>,
    /// Batch settings section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSettings>,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        let mut config: Config = match ext {
            "toml" => toml::from_str(&contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e))?,
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e))?,
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e))?,
        };

        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    /// `base_dir` is used to resolve relative paths.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.data_dir = self.resolve_path(data_dir, base_dir);
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        if let Some(ref broker) = self.broker_url {
            settings.broker_url = Some(broker.clone());
        }
        if let Some(ref url) = self.channel_service_url {
            settings.channel_service_url = Some(url.clone());
        }
        if let Some(ref batch) = self.batch {
            settings.batch = batch.clone();
        }
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override (--data-dir flag).
    pub data_dir: Option<PathBuf>,
}

/// Look for a config file inside the data directory.
fn find_config_in_dir(data_dir: &Path) -> Option<PathBuf> {
    let extensions = ["json", "toml", "yaml", "yml"];
    let basenames = ["retriever", "config"];

    for basename in basenames {
        for ext in extensions {
            let path = data_dir.join(format!("{}.{}", basename, ext));
            if path.exists() {
                return Some(path);
            }
        }
    }
    None
}

/// Load settings with explicit options.
/// Returns (Settings, Config) tuple.
pub async fn load_settings_with_options(options: LoadOptions) -> (Settings, Config) {
    let mut settings = Settings::default();
    if let Some(ref data_dir) = options.data_dir {
        settings.data_dir = data_dir.clone();
    }

    let config = if let Some(ref path) = options.config_path {
        Config::load_from_path(path).await.unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable config file: {}", e);
            Config::default()
        })
    } else if let Some(path) = find_config_in_dir(&settings.data_dir) {
        tracing::debug!("Found config in data dir: {}", path.display());
        Config::load_from_path(&path).await.unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    let base_dir = config
        .base_dir()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    config.apply_to_settings(&mut settings, &base_dir);

    // The --data-dir flag takes precedence over the config file.
    if let Some(data_dir) = options.data_dir {
        settings.data_dir = data_dir;
    }

    // Environment variables take highest precedence.
    if let Some(database_url) = env_str("DATABASE_URL") {
        tracing::debug!("Using DATABASE_URL from environment");
        settings.database_url = Some(database_url);
    }
    if let Some(broker) = env_str("BROKER_URL") {
        tracing::debug!("Using BROKER_URL from environment");
        settings.broker_url = Some(broker);
    }
    if let Some(url) = env_str("CHANNEL_SERVICE_URL") {
        settings.channel_service_url = Some(url);
    }
    settings.batch = settings.batch.clone().with_env_overrides();

    (settings, config)
}
