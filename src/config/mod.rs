//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroUsize, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::DEFAULT_TIME_FORMAT;

const LOCAL_CONFIG_BASENAME: &str = "linkroll";
const ENV_PREFIX: &str = "LINKROLL";
const DEFAULT_URL: &str = "http://localhost:3000";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_CACHE_SIZE: i64 = 128;
const DEFAULT_LINK_PER_PAGE: u64 = 10;
const DEFAULT_TITLE: &str = "linkroll";
const DEFAULT_DATABASE_FILE: &str = "data/links.dsv";
const DEFAULT_STAGING_FILE: &str = "data/staging.dsv";
const DEFAULT_AUTOPUBLISH_EVERY: &str = "day";
const DEFAULT_LINK_PER_PUBLICATION: u64 = 1;

/// Command-line arguments for the linkroll binary.
#[derive(Debug, Parser)]
#[command(name = "linkroll", version, about = "Paginated link list server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "LINKROLL_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the link pages over HTTP.
    Serve(Box<ServeArgs>),
    /// Answer a single request path on stdout.
    Page(PageArgs),
    /// Append an entry file to the staging store.
    Stage(StageArgs),
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

    /// Override the public base URL used in page links.
    #[arg(long = "server-url", value_name = "URL")]
    pub server_url: Option<String>,

    /// Override the page cache capacity; zero or less disables caching.
    #[arg(long = "cache-size", value_name = "COUNT", allow_negative_numbers = true)]
    pub cache_size: Option<i64>,

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

    #[command(flatten)]
    pub database: DatabaseOverride,
}

#[derive(Debug, Args, Default, Clone)]
pub struct DatabaseOverride {
    /// Override the published link store path.
    #[arg(long = "database-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub database_file: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct PageArgs {
    #[command(flatten)]
    pub database: DatabaseOverride,

    /// Request path, e.g. `/2` or `/cache`.
    #[arg(value_name = "PATH", default_value = "/")]
    pub path: String,
}

#[derive(Debug, Args, Clone)]
pub struct StageArgs {
    /// Override the staging store path.
    #[arg(long = "staging-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub staging_file: Option<PathBuf>,

    /// Entry file: title on the first line, url on the second, description after.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub html: HtmlSettings,
    pub template: TemplateSettings,
    pub database: DatabaseSettings,
    pub autopublish: AutopublishSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Public base URL, used for page navigation and redirection.
    pub url: String,
    pub listen_addr: SocketAddr,
    /// Page cache capacity; zero disables caching.
    pub cache_size: usize,
    /// Whether the diagnostic commands (`cache`, `stack`, ...) are served.
    pub commands: bool,
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
pub struct HtmlSettings {
    pub link_per_page: NonZeroUsize,
    pub title: String,
    pub additional_header: Option<PathBuf>,
    pub additional_footer: Option<PathBuf>,
    pub as_html: bool,
}

#[derive(Debug, Clone)]
pub struct TemplateSettings {
    pub link: Option<PathBuf>,
    pub page: Option<PathBuf>,
    pub link_separator: Option<PathBuf>,
    /// strftime pattern; empty omits publication dates.
    pub time_format: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub filepath: PathBuf,
    pub memory_wise: bool,
    pub seed_when_empty: bool,
}

#[derive(Debug, Clone)]
pub struct AutopublishSettings {
    pub active: bool,
    pub filepath: PathBuf,
    /// Seconds or a unit name; interpreted when a move is considered.
    pub every: String,
    pub link_per_publication: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Page(args)) => raw.apply_database_override(&args.database),
        Some(Command::Stage(args)) => {
            if let Some(path) = args.staging_file.as_ref() {
                raw.autopublish.filepath = Some(path.clone());
            }
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    html: RawHtmlSettings,
    template: RawTemplateSettings,
    database: RawDatabaseSettings,
    autopublish: RawAutopublishSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.server_url.as_ref() {
            self.server.url = Some(url.clone());
        }
        if let Some(size) = overrides.cache_size {
            self.server.cache_size = Some(size);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        self.apply_database_override(&overrides.database);
    }

    fn apply_database_override(&mut self, overrides: &DatabaseOverride) {
        if let Some(path) = overrides.database_file.as_ref() {
            self.database.filepath = Some(path.clone());
        }
    }
}

impl Settings {
    /// Built-in defaults, ignoring files, environment and CLI.
    pub fn defaults() -> Result<Self, LoadError> {
        Self::from_raw(RawSettings::default())
    }

    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            html,
            template,
            database,
            autopublish,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            html: build_html_settings(html)?,
            template: build_template_settings(template),
            database: build_database_settings(database)?,
            autopublish: build_autopublish_settings(autopublish)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let url = server
        .url
        .map(|url| url.trim().trim_end_matches('/').to_string())
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    if url.is_empty() {
        return Err(LoadError::invalid("server.url", "must not be empty"));
    }

    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let listen_addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.listen_addr", reason))?;

    let cache_size = server.cache_size.unwrap_or(DEFAULT_CACHE_SIZE).max(0);
    let cache_size = usize::try_from(cache_size).map_err(|_| {
        LoadError::invalid(
            "server.cache_size",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(ServerSettings {
        url,
        listen_addr,
        cache_size,
        commands: server.commands.unwrap_or(true),
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

fn build_html_settings(html: RawHtmlSettings) -> Result<HtmlSettings, LoadError> {
    let link_per_page = non_zero_usize(
        html.link_per_page.unwrap_or(DEFAULT_LINK_PER_PAGE),
        "html.link_per_page",
    )?;

    Ok(HtmlSettings {
        link_per_page,
        title: html.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        additional_header: optional_path(html.additional_header),
        additional_footer: optional_path(html.additional_footer),
        as_html: html.as_html.unwrap_or(true),
    })
}

fn build_template_settings(template: RawTemplateSettings) -> TemplateSettings {
    TemplateSettings {
        link: optional_path(template.link),
        page: optional_path(template.page),
        link_separator: optional_path(template.link_separator),
        time_format: template
            .time_format
            .unwrap_or_else(|| DEFAULT_TIME_FORMAT.to_string()),
    }
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let filepath = database
        .filepath
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE_FILE));
    if filepath.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "database.filepath",
            "path must not be empty",
        ));
    }

    Ok(DatabaseSettings {
        filepath,
        memory_wise: database.memory_wise.unwrap_or(false),
        seed_when_empty: database.seed_when_empty.unwrap_or(true),
    })
}

fn build_autopublish_settings(
    autopublish: RawAutopublishSettings,
) -> Result<AutopublishSettings, LoadError> {
    let filepath = autopublish
        .filepath
        .unwrap_or_else(|| PathBuf::from(DEFAULT_STAGING_FILE));
    if filepath.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "autopublish.filepath",
            "path must not be empty",
        ));
    }

    let link_per_publication = non_zero_usize(
        autopublish
            .link_per_publication
            .unwrap_or(DEFAULT_LINK_PER_PUBLICATION),
        "autopublish.link_per_publication",
    )?;

    Ok(AutopublishSettings {
        active: autopublish.active.unwrap_or(false),
        filepath,
        every: autopublish
            .every
            .map(|every| every.trim().to_string())
            .unwrap_or_else(|| DEFAULT_AUTOPUBLISH_EVERY.to_string()),
        link_per_publication,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    cache_size: Option<i64>,
    commands: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHtmlSettings {
    link_per_page: Option<u64>,
    title: Option<String>,
    additional_header: Option<String>,
    additional_footer: Option<String>,
    as_html: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTemplateSettings {
    link: Option<String>,
    page: Option<String>,
    link_separator: Option<String>,
    time_format: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    filepath: Option<PathBuf>,
    memory_wise: Option<bool>,
    seed_when_empty: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAutopublishSettings {
    active: Option<bool>,
    filepath: Option<PathBuf>,
    every: Option<String>,
    link_per_publication: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Empty strings mean "not configured".
fn optional_path(value: Option<String>) -> Option<PathBuf> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    })
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
