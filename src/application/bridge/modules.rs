//! Virtual modules exposing host state to the isolated runtime.
//!
//! Source text is synthesized from the current snapshot on every load, so a
//! route rebuild is observed by the next load without any invalidation.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::debug;

use crate::cache::RouteCache;
use crate::domain::manifest::ManifestSnapshot;

/// Reserved specifier prefix for virtual modules.
pub const VIRTUAL_PREFIX: &str = "vellum:";
pub const ENV_CONTEXT_MODULE: &str = "vellum:env-context";
pub const ROUTES_MODULE: &str = "vellum:routes";

/// Marks resolved ids as virtual so no other loader claims them.
const RESOLVED_MARKER: char = '\0';

/// Module loader protocol. `None` means "not handled" and lets the host's
/// normal resolution proceed.
pub trait ModuleLoader: Send + Sync {
    fn resolve_id(&self, specifier: &str) -> Option<String>;

    fn load(&self, id: &str) -> Option<String>;
}

pub struct VirtualModules {
    routes: Arc<RouteCache>,
}

impl VirtualModules {
    pub fn new(routes: Arc<RouteCache>) -> Self {
        Self { routes }
    }

    /// Typed handoff of the current snapshot for runtimes sharing the host
    /// address space.
    pub fn snapshot(&self) -> Arc<ManifestSnapshot> {
        self.routes.snapshot()
    }
}

impl ModuleLoader for VirtualModules {
    fn resolve_id(&self, specifier: &str) -> Option<String> {
        if !specifier.starts_with(VIRTUAL_PREFIX) {
            return None;
        }
        match specifier {
            ENV_CONTEXT_MODULE | ROUTES_MODULE => Some(format!("{RESOLVED_MARKER}{specifier}")),
            _ => {
                debug!(
                    target = "vellum::bridge",
                    specifier, "Unknown virtual module specifier"
                );
                None
            }
        }
    }

    fn load(&self, id: &str) -> Option<String> {
        let specifier = id.strip_prefix(RESOLVED_MARKER)?;
        let snapshot = self.routes.snapshot();
        match specifier {
            ENV_CONTEXT_MODULE => Some(env_context_source(&snapshot)),
            ROUTES_MODULE => Some(routes_source(&snapshot)),
            _ => None,
        }
    }
}

/// Serialized manifest fields. Containers that only a production build
/// fills are emitted empty rather than omitted.
fn manifest_value(snapshot: &ManifestSnapshot) -> Value {
    let i18n = snapshot.i18n.as_ref().map(|i18n| {
        json!({
            "fallbackType": i18n.fallback_type,
            "strategy": i18n.strategy,
            "locales": i18n.locales,
            "defaultLocale": i18n.default_locale,
            "fallback": i18n.fallback,
            "domainLookupTable": i18n.domain_lookup_table,
        })
    });

    json!({
        "base": snapshot.base,
        "trailingSlash": snapshot.trailing_slash,
        "buildFormat": snapshot.build_format,
        "compressHTML": snapshot.compress_html,
        "assetsPrefix": snapshot.assets_prefix,
        "site": snapshot.site,
        "i18n": i18n,
        "checkOrigin": snapshot.check_origin,
        "adapterName": snapshot.adapter_name,
        "clientDirectives": snapshot.client_directives,
        "version": snapshot.version,
        "assets": [],
        "entryModules": {},
        "renderers": [],
        "componentMetadata": {},
        "inlinedScripts": {},
        "routes": [],
    })
}

fn env_context_source(snapshot: &ManifestSnapshot) -> String {
    format!(
        "export const manifest = {};\nexport const middleware = (_context, next) => next();\n",
        module_literal(&manifest_value(snapshot))
    )
}

fn routes_source(snapshot: &ManifestSnapshot) -> String {
    let routes = serde_json::to_value(&*snapshot.routes).unwrap_or_else(|_| json!([]));
    format!(
        "export const routes = {};\nexport const version = {};\n",
        module_literal(&routes),
        snapshot.version
    )
}

fn module_literal(value: &Value) -> String {
    escape_for_module(&value.to_string())
}

/// Make serialized JSON safe to embed in module source. Every replacement
/// is a JSON escape, so the text still parses as the same value.
pub fn escape_for_module(json: &str) -> String {
    let mut escaped = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => escaped.push_str("\\u003c"),
            '>' => escaped.push_str("\\u003e"),
            '\u{2028}' => escaped.push_str("\\u2028"),
            '\u{2029}' => escaped.push_str("\\u2029"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Read back `export const <name> = <json>;` from synthesized source.
pub fn exported_json(source: &str, name: &str) -> Option<Value> {
    let prefix = format!("export const {name} = ");
    source
        .lines()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .map(|rest| rest.trim_end().trim_end_matches(';'))
        .and_then(|literal| serde_json::from_str(literal).ok())
}
