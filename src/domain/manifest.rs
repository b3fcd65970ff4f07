//! Site-wide configuration and the per-rebuild manifest snapshot.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use super::error::DomainError;
use super::routes::RouteDescriptor;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingSlash {
    Always,
    Never,
    #[default]
    Ignore,
}

impl TrailingSlash {
    pub fn as_str(self) -> &'static str {
        match self {
            TrailingSlash::Always => "always",
            TrailingSlash::Never => "never",
            TrailingSlash::Ignore => "ignore",
        }
    }

    /// Whether a pathname's trailing slash is acceptable under this policy.
    pub fn accepts(self, pathname: &str) -> bool {
        if pathname.is_empty() || pathname == "/" {
            return true;
        }
        match self {
            TrailingSlash::Always => pathname.ends_with('/'),
            TrailingSlash::Never => !pathname.ends_with('/'),
            TrailingSlash::Ignore => true,
        }
    }
}

impl FromStr for TrailingSlash {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(TrailingSlash::Always),
            "never" => Ok(TrailingSlash::Never),
            "ignore" => Ok(TrailingSlash::Ignore),
            other => Err(DomainError::validation(format!(
                "unknown trailing slash policy `{other}`"
            ))),
        }
    }
}

impl fmt::Display for TrailingSlash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildFormat {
    #[default]
    Directory,
    File,
    Preserve,
}

impl FromStr for BuildFormat {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "directory" => Ok(BuildFormat::Directory),
            "file" => Ok(BuildFormat::File),
            "preserve" => Ok(BuildFormat::Preserve),
            other => Err(DomainError::validation(format!(
                "unknown build format `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackType {
    #[default]
    Redirect,
    Rewrite,
}

impl FromStr for FallbackType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "redirect" => Ok(FallbackType::Redirect),
            "rewrite" => Ok(FallbackType::Rewrite),
            other => Err(DomainError::validation(format!(
                "unknown i18n fallback type `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    #[default]
    PathnamePrefixOtherLocales,
    PathnamePrefixAlways,
    DomainsPrefixOtherLocales,
    Manual,
}

impl FromStr for RoutingStrategy {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "pathname-prefix-other-locales" => Ok(RoutingStrategy::PathnamePrefixOtherLocales),
            "pathname-prefix-always" => Ok(RoutingStrategy::PathnamePrefixAlways),
            "domains-prefix-other-locales" => Ok(RoutingStrategy::DomainsPrefixOtherLocales),
            "manual" => Ok(RoutingStrategy::Manual),
            other => Err(DomainError::validation(format!(
                "unknown i18n routing strategy `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct I18nConfig {
    pub default_locale: String,
    pub locales: Vec<String>,
    /// Locale → locale to fall back to when a page is missing.
    pub fallback: BTreeMap<String, String>,
    pub fallback_type: FallbackType,
    pub strategy: RoutingStrategy,
    /// Domain → locale.
    pub domain_lookup_table: BTreeMap<String, String>,
}

/// Site settings that every manifest snapshot is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteConfig {
    /// Mount path with the trailing slash removed; empty for the root.
    pub base: String,
    pub trailing_slash: TrailingSlash,
    pub build_format: BuildFormat,
    pub compress_html: bool,
    pub assets_prefix: Option<String>,
    pub site: Option<String>,
    pub i18n: Option<I18nConfig>,
    pub check_origin: bool,
    pub adapter_name: String,
    pub client_directives: BTreeMap<String, String>,
    /// Source pattern → redirect target.
    pub redirects: BTreeMap<String, String>,
    /// Prerender flag assigned to project routes.
    pub prerender_default: bool,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base: String::new(),
            trailing_slash: TrailingSlash::default(),
            build_format: BuildFormat::default(),
            compress_html: true,
            assets_prefix: None,
            site: None,
            i18n: None,
            check_origin: false,
            adapter_name: String::new(),
            client_directives: BTreeMap::new(),
            redirects: BTreeMap::new(),
            prerender_default: true,
        }
    }
}

/// Strip a trailing slash from `base` and make sure it starts with `/`.
///
/// The root mount normalizes to the empty string so it can be prepended.
pub fn normalize_base(base: &str) -> String {
    let trimmed = base.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}

/// Immutable bundle of site configuration plus the route table.
///
/// A rebuild replaces the whole snapshot; nothing mutates one in place.
#[derive(Debug, Clone)]
pub struct ManifestSnapshot {
    pub base: String,
    pub trailing_slash: TrailingSlash,
    pub build_format: BuildFormat,
    pub compress_html: bool,
    pub assets_prefix: Option<String>,
    pub site: Option<String>,
    pub i18n: Option<I18nConfig>,
    pub check_origin: bool,
    pub adapter_name: String,
    pub client_directives: BTreeMap<String, String>,
    pub routes: Arc<[RouteDescriptor]>,
    /// Monotonic rebuild counter.
    pub version: u64,
    pub built_at: OffsetDateTime,
}

impl ManifestSnapshot {
    pub fn new(site: &SiteConfig, routes: Arc<[RouteDescriptor]>, version: u64) -> Self {
        Self {
            base: normalize_base(&site.base),
            trailing_slash: site.trailing_slash,
            build_format: site.build_format,
            compress_html: site.compress_html,
            assets_prefix: site.assets_prefix.clone(),
            site: site.site.clone(),
            i18n: site.i18n.clone(),
            check_origin: site.check_origin,
            adapter_name: site.adapter_name.clone(),
            client_directives: site.client_directives.clone(),
            routes,
            version,
            built_at: OffsetDateTime::now_utc(),
        }
    }

    /// Same configuration, new route list and version.
    pub fn with_routes(&self, routes: Arc<[RouteDescriptor]>, version: u64) -> Self {
        Self {
            routes,
            version,
            built_at: OffsetDateTime::now_utc(),
            ..self.clone()
        }
    }
}
