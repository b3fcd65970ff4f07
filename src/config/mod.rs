//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::NonZeroUsize,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::manifest::{
    BuildFormat, FallbackType, I18nConfig, RoutingStrategy, SiteConfig, TrailingSlash,
    normalize_base,
};

pub use cli::{CliArgs, Command, DevArgs, DevOverrides, ProjectOverride, RoutesArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vellum";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4321;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 5;
const DEFAULT_PAGES_DIR: &str = "src/pages";
const DEFAULT_ADAPTER_NAME: &str = "";
const DEFAULT_WATCH_INTERVAL_MS: u64 = 250;
const DEFAULT_ERROR_NOTIFY_DELAY_MS: u64 = 200;
const DEFAULT_ROUTE_CACHE_CAPACITY: usize = 1024;
const DEFAULT_LIVERELOAD_CAPACITY: usize = 64;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub project: ProjectSettings,
    pub site: SiteConfig,
    pub dev: DevSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
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
pub struct ProjectSettings {
    pub root: PathBuf,
    /// Relative to `root`.
    pub pages_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct DevSettings {
    pub watch_interval: Duration,
    pub error_notify_delay: Duration,
    pub route_cache_capacity: NonZeroUsize,
    pub livereload_capacity: usize,
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
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VELLUM").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Dev(args)) => raw.apply_dev_overrides(&args.overrides),
        Some(Command::Routes(args)) => raw.apply_project_override(&args.project),
        None => raw.apply_dev_overrides(&DevOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    project: RawProjectSettings,
    site: RawSiteSettings,
    i18n: RawI18nSettings,
    dev: RawDevSettings,
}

impl RawSettings {
    fn apply_dev_overrides(&mut self, overrides: &DevOverrides) {
        self.apply_project_override(&overrides.project);

        if let Some(host) = overrides.host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.port {
            self.server.port = Some(port);
        }
        if let Some(base) = overrides.base.as_ref() {
            self.site.base = Some(base.clone());
        }
        if let Some(policy) = overrides.trailing_slash.as_ref() {
            self.site.trailing_slash = Some(policy.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(interval) = overrides.watch_interval_ms {
            self.dev.watch_interval_ms = Some(interval);
        }
    }

    fn apply_project_override(&mut self, overrides: &ProjectOverride) {
        if let Some(root) = overrides.root.as_ref() {
            self.project.root = Some(root.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            project,
            site,
            i18n,
            dev,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let project = build_project_settings(project)?;
        let i18n = build_i18n_config(i18n)?;
        let site = build_site_config(site, i18n)?;
        let dev = build_dev_settings(dev)?;

        Ok(Self {
            server,
            logging,
            project,
            site,
            dev,
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

    let candidate = format!("{host}:{port}");
    let addr: SocketAddr = candidate.parse().map_err(|err| {
        LoadError::invalid("server.addr", format!("invalid address `{candidate}`: {err}"))
    })?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_project_settings(project: RawProjectSettings) -> Result<ProjectSettings, LoadError> {
    let root = project.root.unwrap_or_else(|| PathBuf::from("."));
    if root.as_os_str().is_empty() {
        return Err(LoadError::invalid("project.root", "path must not be empty"));
    }

    let pages_dir = project
        .pages_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_PAGES_DIR));
    if pages_dir.as_os_str().is_empty() || pages_dir.is_absolute() {
        return Err(LoadError::invalid(
            "project.pages_dir",
            "path must be relative to the project root",
        ));
    }

    Ok(ProjectSettings { root, pages_dir })
}

fn build_site_config(
    site: RawSiteSettings,
    i18n: Option<I18nConfig>,
) -> Result<SiteConfig, LoadError> {
    let defaults = SiteConfig::default();

    let trailing_slash = match site.trailing_slash {
        Some(value) => TrailingSlash::from_str(&value)
            .map_err(|err| LoadError::invalid("site.trailing_slash", err.to_string()))?,
        None => defaults.trailing_slash,
    };
    let build_format = match site.build_format {
        Some(value) => BuildFormat::from_str(&value)
            .map_err(|err| LoadError::invalid("site.build_format", err.to_string()))?,
        None => defaults.build_format,
    };

    let origin = match site.site {
        Some(value) if !value.trim().is_empty() => {
            let url = Url::parse(value.trim())
                .map_err(|err| LoadError::invalid("site.site", format!("invalid URL: {err}")))?;
            Some(url.to_string())
        }
        _ => None,
    };

    for (from, to) in &site.redirects {
        if !from.starts_with('/') {
            return Err(LoadError::invalid(
                "site.redirects",
                format!("redirect source `{from}` must start with `/`"),
            ));
        }
        if to.trim().is_empty() {
            return Err(LoadError::invalid(
                "site.redirects",
                format!("redirect `{from}` has an empty target"),
            ));
        }
    }

    Ok(SiteConfig {
        base: normalize_base(site.base.as_deref().unwrap_or("")),
        trailing_slash,
        build_format,
        compress_html: site.compress_html.unwrap_or(defaults.compress_html),
        assets_prefix: site.assets_prefix.filter(|prefix| !prefix.trim().is_empty()),
        site: origin,
        i18n,
        check_origin: site.check_origin.unwrap_or(defaults.check_origin),
        adapter_name: site
            .adapter_name
            .unwrap_or_else(|| DEFAULT_ADAPTER_NAME.to_string()),
        client_directives: site.client_directives,
        redirects: site.redirects,
        prerender_default: site.prerender_default.unwrap_or(defaults.prerender_default),
    })
}

fn build_i18n_config(i18n: RawI18nSettings) -> Result<Option<I18nConfig>, LoadError> {
    let Some(default_locale) = i18n.default_locale else {
        return Ok(None);
    };

    let mut locales = i18n.locales;
    if locales.is_empty() {
        locales.push(default_locale.clone());
    }
    if !locales.contains(&default_locale) {
        return Err(LoadError::invalid(
            "i18n.default_locale",
            format!("`{default_locale}` is not listed in i18n.locales"),
        ));
    }
    if let Some((from, _)) = i18n
        .fallback
        .iter()
        .find(|(from, to)| !locales.contains(*from) || !locales.contains(*to))
    {
        return Err(LoadError::invalid(
            "i18n.fallback",
            format!("fallback for `{from}` refers to an unknown locale"),
        ));
    }

    let fallback_type = match i18n.fallback_type {
        Some(value) => FallbackType::from_str(&value)
            .map_err(|err| LoadError::invalid("i18n.fallback_type", err.to_string()))?,
        None => FallbackType::default(),
    };
    let strategy = match i18n.routing {
        Some(value) => RoutingStrategy::from_str(&value)
            .map_err(|err| LoadError::invalid("i18n.routing", err.to_string()))?,
        None => RoutingStrategy::default(),
    };

    Ok(Some(I18nConfig {
        default_locale,
        locales,
        fallback: i18n.fallback,
        fallback_type,
        strategy,
        domain_lookup_table: i18n.domains,
    }))
}

fn build_dev_settings(dev: RawDevSettings) -> Result<DevSettings, LoadError> {
    let watch_interval_ms = dev.watch_interval_ms.unwrap_or(DEFAULT_WATCH_INTERVAL_MS);
    if watch_interval_ms == 0 {
        return Err(LoadError::invalid(
            "dev.watch_interval_ms",
            "must be greater than zero",
        ));
    }

    let capacity = dev
        .route_cache_capacity
        .unwrap_or(DEFAULT_ROUTE_CACHE_CAPACITY);
    let route_cache_capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
        LoadError::invalid("dev.route_cache_capacity", "must be greater than zero")
    })?;

    Ok(DevSettings {
        watch_interval: Duration::from_millis(watch_interval_ms),
        error_notify_delay: Duration::from_millis(
            dev.error_notify_delay_ms
                .unwrap_or(DEFAULT_ERROR_NOTIFY_DELAY_MS),
        ),
        route_cache_capacity,
        livereload_capacity: dev
            .livereload_capacity
            .unwrap_or(DEFAULT_LIVERELOAD_CAPACITY)
            .max(1),
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawProjectSettings {
    root: Option<PathBuf>,
    pages_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    base: Option<String>,
    trailing_slash: Option<String>,
    build_format: Option<String>,
    compress_html: Option<bool>,
    assets_prefix: Option<String>,
    site: Option<String>,
    check_origin: Option<bool>,
    adapter_name: Option<String>,
    prerender_default: Option<bool>,
    client_directives: BTreeMap<String, String>,
    redirects: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawI18nSettings {
    default_locale: Option<String>,
    locales: Vec<String>,
    fallback: BTreeMap<String, String>,
    fallback_type: Option<String>,
    routing: Option<String>,
    domains: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDevSettings {
    watch_interval_ms: Option<u64>,
    error_notify_delay_ms: Option<u64>,
    route_cache_capacity: Option<usize>,
    livereload_capacity: Option<usize>,
}
