//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::HashMap,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::maintenance::ExportFormat;
use crate::cache::MAX_TTL;
use crate::application::repos::ImportMode;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "stockpile";
const ENV_PREFIX: &str = "STOCKPILE";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3100;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_IMPORT_BODY_LIMIT: u64 = 64 * 1024 * 1024;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_DB_ACQUIRE_TIMEOUT_MS: u64 = 3000;
const DEFAULT_L1_MAX_ENTRIES: u64 = 1000;
const DEFAULT_L1_TTL_SECS: u64 = 10 * 60;
const DEFAULT_ITEM_TTL_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_SEARCH_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_WARMUP_TTL_SECS: u64 = 60 * 60;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;
pub(crate) const DEFAULT_PURGE_DAYS: u32 = 90;

/// Command-line arguments for the Stockpile binary.
#[derive(Debug, Parser)]
#[command(
    name = "stockpile",
    version,
    about = "Two-tier provider cache and maintenance tooling"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "STOCKPILE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the admin HTTP service.
    Serve(Box<ServeArgs>),
    /// Dump cached items to a JSON or NDJSON file.
    Export(ExportArgs),
    /// Load cached items from a JSON or NDJSON file.
    Import(ImportArgs),
    /// Report or delete items that have not been accessed recently.
    Purge(PurgeArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the ephemeral cache capacity.
    #[arg(long = "cache-l1-max-entries", value_name = "COUNT")]
    pub cache_l1_max_entries: Option<u64>,

    /// Serve stale durable rows instead of refetching them.
    #[arg(
        long = "cache-serve-stale",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_serve_stale: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Destination file.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Only export items from this source.
    #[arg(long, value_name = "SOURCE")]
    pub source: Option<String>,

    /// Only export items of this type.
    #[arg(long = "type", value_name = "TYPE")]
    pub item_type: Option<String>,

    /// Output format (json|ndjson).
    #[arg(long, value_name = "FORMAT", default_value = "json")]
    pub format: ExportFormat,
}

#[derive(Debug, Args, Clone)]
pub struct ImportArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Source file, either an export document or NDJSON.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,

    /// Conflict handling (upsert|skip|replace).
    #[arg(long, value_name = "MODE", default_value = "upsert")]
    pub mode: ImportMode,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Inactivity threshold in days.
    #[arg(long, value_name = "DAYS", default_value_t = DEFAULT_PURGE_DAYS)]
    pub days: u32,

    /// Delete the rows; without this flag only a report is printed.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub apply: bool,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Largest request body accepted by `POST /import`, in bytes.
    pub import_body_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub acquire_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub l1_max_entries: NonZeroUsize,
    pub l1_ttl: Duration,
    pub item_ttl: Duration,
    pub item_ttl_overrides: HashMap<String, Duration>,
    pub search_ttl: Duration,
    pub warmup_ttl: Duration,
    pub store_timeout: Duration,
    pub serve_stale: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl LoadError {
    fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Export(args)) => raw.apply_database_override(&args.database),
        Some(Command::Import(args)) => raw.apply_database_override(&args.database),
        Some(Command::Purge(args)) => raw.apply_database_override(&args.database),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(entries) = overrides.cache_l1_max_entries {
            self.cache.l1_max_entries = Some(entries);
        }
        if let Some(serve_stale) = overrides.cache_serve_stale {
            self.cache.serve_stale = Some(serve_stale);
        }
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr =
        parse_socket_addr(&host, port).map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let import_body_limit = usize::try_from(
        server
            .import_body_limit
            .unwrap_or(DEFAULT_IMPORT_BODY_LIMIT),
    )
    .ok()
    .and_then(NonZeroUsize::new)
    .ok_or_else(|| {
        LoadError::invalid("server.import_body_limit", "must be between 1 and usize::MAX")
    })?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        import_body_limit,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let acquire_timeout_ms = database
        .acquire_timeout_ms
        .unwrap_or(DEFAULT_DB_ACQUIRE_TIMEOUT_MS);
    if acquire_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "database.acquire_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(DatabaseSettings {
        url,
        max_connections,
        acquire_timeout: Duration::from_millis(acquire_timeout_ms),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let l1_max_entries_value = cache.l1_max_entries.unwrap_or(DEFAULT_L1_MAX_ENTRIES);
    let l1_max_entries = usize::try_from(l1_max_entries_value)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            LoadError::invalid("cache.l1_max_entries", "must be between 1 and usize::MAX")
        })?;

    let mut item_ttl_overrides = HashMap::with_capacity(cache.item_ttl_overrides.len());
    for (item_type, seconds) in cache.item_ttl_overrides {
        let key = format!("cache.item_ttl_overrides.{item_type}");
        item_ttl_overrides.insert(item_type, secs(Some(seconds), 0, key)?);
    }

    let store_timeout_ms = cache.store_timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS);
    if store_timeout_ms == 0 {
        return Err(LoadError::invalid(
            "cache.store_timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(CacheSettings {
        l1_max_entries,
        l1_ttl: secs(cache.l1_ttl_seconds, DEFAULT_L1_TTL_SECS, "cache.l1_ttl_seconds")?,
        item_ttl: secs(
            cache.item_ttl_seconds,
            DEFAULT_ITEM_TTL_SECS,
            "cache.item_ttl_seconds",
        )?,
        item_ttl_overrides,
        search_ttl: secs(
            cache.search_ttl_seconds,
            DEFAULT_SEARCH_TTL_SECS,
            "cache.search_ttl_seconds",
        )?,
        warmup_ttl: secs(
            cache.warmup_ttl_seconds,
            DEFAULT_WARMUP_TTL_SECS,
            "cache.warmup_ttl_seconds",
        )?,
        store_timeout: Duration::from_millis(store_timeout_ms),
        serve_stale: cache.serve_stale.unwrap_or(true),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    import_body_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    l1_max_entries: Option<u64>,
    l1_ttl_seconds: Option<u64>,
    item_ttl_seconds: Option<u64>,
    item_ttl_overrides: HashMap<String, u64>,
    search_ttl_seconds: Option<u64>,
    warmup_ttl_seconds: Option<u64>,
    store_timeout_ms: Option<u64>,
    serve_stale: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// TTLs may be zero (expire immediately) but never exceed `MAX_TTL`.
fn secs(value: Option<u64>, default: u64, key: impl Into<String>) -> Result<Duration, LoadError> {
    let ttl = Duration::from_secs(value.unwrap_or(default));
    if ttl > MAX_TTL {
        return Err(LoadError::invalid(
            key,
            format!("must be at most {} seconds", MAX_TTL.as_secs()),
        ));
    }
    Ok(ttl)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
