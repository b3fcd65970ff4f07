//! Route descriptors and path-segment patterns.
//!
//! A pattern such as `/blog/[slug]` or `/docs/[...path]` is stored as a list
//! of segments, each of which is a list of static or dynamic parts.

use std::collections::BTreeMap;
use std::fmt;
use std::iter;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Parameters extracted from a matched pathname, keyed by parameter name.
pub type Params = BTreeMap<String, String>;

/// One path segment. Usually a single part; mixed segments like
/// `post-[id]` carry several.
pub type Segment = Vec<SegmentPart>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteType {
    Page,
    Endpoint,
    Redirect,
}

impl RouteType {
    pub fn as_str(self) -> &'static str {
        match self {
            RouteType::Page => "page",
            RouteType::Endpoint => "endpoint",
            RouteType::Redirect => "redirect",
        }
    }
}

/// Whether a route was declared by the project or injected by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteOrigin {
    Project,
    Internal,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentPart {
    pub content: String,
    pub dynamic: bool,
    pub spread: bool,
}

impl SegmentPart {
    pub fn literal(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            dynamic: false,
            spread: false,
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        Self {
            content: name.into(),
            dynamic: true,
            spread: false,
        }
    }

    pub fn rest(name: impl Into<String>) -> Self {
        Self {
            content: name.into(),
            dynamic: true,
            spread: true,
        }
    }
}

/// A single declared page, endpoint or redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDescriptor {
    pub pattern: String,
    pub component: String,
    pub params: Vec<String>,
    pub segments: Vec<Segment>,
    #[serde(rename = "type")]
    pub route_type: RouteType,
    pub prerender: bool,
    pub redirect: Option<String>,
    pub is_index: bool,
    pub origin: RouteOrigin,
}

impl RouteDescriptor {
    pub fn new(
        segments: Vec<Segment>,
        component: impl Into<String>,
        route_type: RouteType,
        origin: RouteOrigin,
    ) -> Self {
        let params = segments
            .iter()
            .flatten()
            .filter(|part| part.dynamic)
            .map(|part| part.content.clone())
            .collect();

        Self {
            pattern: pattern_text(&segments),
            component: component.into(),
            params,
            segments,
            route_type,
            prerender: false,
            redirect: None,
            is_index: false,
            origin,
        }
    }

    pub fn with_prerender(mut self, prerender: bool) -> Self {
        self.prerender = prerender;
        self
    }

    pub fn with_redirect(mut self, target: impl Into<String>) -> Self {
        self.redirect = Some(target.into());
        self
    }

    pub fn with_index(mut self, is_index: bool) -> Self {
        self.is_index = is_index;
        self
    }

    /// Pattern with parameter names erased, used to detect collisions.
    pub fn normalized_pattern(&self) -> String {
        normalized_pattern(&self.segments)
    }

    pub fn has_spread(&self) -> bool {
        self.segments.iter().flatten().any(|part| part.spread)
    }

    /// Match a base-relative pathname, returning extracted parameters.
    pub fn match_path(&self, pathname: &str) -> Option<Params> {
        let path_segments: Vec<&str> = pathname.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Params::new();
        match_segments(&self.segments, &path_segments, &mut params).then_some(params)
    }
}

impl fmt::Display for RouteDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} -> {}",
            self.route_type.as_str(),
            self.pattern,
            self.component
        )
    }
}

/// Parse a route path like `blog/[slug]` into segments.
pub fn parse_route_path(path: &str) -> Result<Vec<Segment>, DomainError> {
    path.split('/')
        .filter(|raw| !raw.is_empty())
        .map(parse_segment)
        .collect()
}

/// Parse a single path segment such as `post-[id]` or `[...rest]`.
pub fn parse_segment(raw: &str) -> Result<Segment, DomainError> {
    let mut parts = Vec::new();
    let mut rest = raw;

    while !rest.is_empty() {
        let Some(start) = rest.find('[') else {
            push_literal(&mut parts, rest, raw)?;
            break;
        };

        if start > 0 {
            push_literal(&mut parts, &rest[..start], raw)?;
        }

        let after = &rest[start + 1..];
        let end = after
            .find(']')
            .ok_or_else(|| DomainError::validation(format!("unclosed `[` in segment `{raw}`")))?;
        let inner = &after[..end];
        let (name, spread) = match inner.strip_prefix("...") {
            Some(name) => (name, true),
            None => (inner, false),
        };

        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        {
            return Err(DomainError::validation(format!(
                "invalid parameter name `{inner}` in segment `{raw}`"
            )));
        }

        if parts.last().is_some_and(|part: &SegmentPart| part.dynamic) {
            return Err(DomainError::validation(format!(
                "adjacent parameters in segment `{raw}` cannot be told apart"
            )));
        }

        parts.push(if spread {
            SegmentPart::rest(name)
        } else {
            SegmentPart::param(name)
        });
        rest = &after[end + 1..];
    }

    Ok(parts)
}

fn push_literal(parts: &mut Segment, text: &str, raw: &str) -> Result<(), DomainError> {
    if text.contains(']') {
        return Err(DomainError::validation(format!(
            "unexpected `]` in segment `{raw}`"
        )));
    }
    parts.push(SegmentPart::literal(text));
    Ok(())
}

pub fn pattern_text(segments: &[Segment]) -> String {
    render_pattern(segments, |part| match (part.dynamic, part.spread) {
        (true, true) => format!("[...{}]", part.content),
        (true, false) => format!("[{}]", part.content),
        _ => part.content.clone(),
    })
}

pub fn normalized_pattern(segments: &[Segment]) -> String {
    render_pattern(segments, |part| match (part.dynamic, part.spread) {
        (true, true) => "[..._]".to_string(),
        (true, false) => "[_]".to_string(),
        _ => part.content.clone(),
    })
}

fn render_pattern(segments: &[Segment], render: impl Fn(&SegmentPart) -> String) -> String {
    let body = segments
        .iter()
        .map(|segment| segment.iter().map(&render).collect::<String>())
        .collect::<Vec<_>>()
        .join("/");
    format!("/{body}")
}

/// Specificity rank of a segment: lower ranks win.
pub fn segment_rank(segment: &Segment) -> u8 {
    if segment.iter().all(|part| !part.dynamic) {
        0
    } else if segment.iter().any(|part| part.spread) {
        3
    } else if segment.len() == 1 {
        2
    } else {
        1
    }
}

fn match_segments(route: &[Segment], path: &[&str], params: &mut Params) -> bool {
    let Some((segment, rest)) = route.split_first() else {
        return path.is_empty();
    };

    if let [part] = segment.as_slice()
        && part.spread
    {
        for taken in (0..=path.len()).rev() {
            let mut attempt = params.clone();
            attempt.insert(part.content.clone(), path[..taken].join("/"));
            if match_segments(rest, &path[taken..], &mut attempt) {
                *params = attempt;
                return true;
            }
        }
        return false;
    }

    let Some((head, tail)) = path.split_first() else {
        return false;
    };

    let mut attempt = params.clone();
    if match_parts(segment, head, &mut attempt) && match_segments(rest, tail, &mut attempt) {
        *params = attempt;
        true
    } else {
        false
    }
}

fn match_parts(parts: &[SegmentPart], text: &str, params: &mut Params) -> bool {
    let Some((part, rest)) = parts.split_first() else {
        return text.is_empty();
    };

    if !part.dynamic {
        return text
            .strip_prefix(part.content.as_str())
            .is_some_and(|remainder| match_parts(rest, remainder, params));
    }

    if text.is_empty() {
        return false;
    }

    let ends = text
        .char_indices()
        .map(|(index, _)| index)
        .skip(1)
        .chain(iter::once(text.len()));

    for end in ends {
        let (value, remainder) = text.split_at(end);
        let mut attempt = params.clone();
        attempt.insert(part.content.clone(), value.to_string());
        if match_parts(rest, remainder, &mut attempt) {
            *params = attempt;
            return true;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(path: &str) -> RouteDescriptor {
        RouteDescriptor::new(
            parse_route_path(path).expect("valid route path"),
            format!("src/pages/{path}.md"),
            RouteType::Page,
            RouteOrigin::Project,
        )
    }

    #[test]
    fn parses_mixed_segments() {
        let segment = parse_segment("post-[id]").expect("valid segment");
        assert_eq!(
            segment,
            vec![SegmentPart::literal("post-"), SegmentPart::param("id")]
        );
    }

    #[test]
    fn rejects_unclosed_parameter() {
        let err = parse_segment("[slug").expect_err("unclosed bracket");
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn rejects_adjacent_parameters() {
        assert!(parse_segment("[a][b]").is_err());
    }

    #[test]
    fn pattern_text_round_trips_names() {
        let descriptor = route("docs/[...path]");
        assert_eq!(descriptor.pattern, "/docs/[...path]");
        assert_eq!(descriptor.params, vec!["path".to_string()]);
        assert!(descriptor.has_spread());
    }

    #[test]
    fn normalized_pattern_erases_names() {
        assert_eq!(route("blog/[slug]").normalized_pattern(), "/blog/[_]");
        assert_eq!(route("blog/[id]").normalized_pattern(), "/blog/[_]");
    }

    #[test]
    fn root_pattern_is_slash() {
        let descriptor = RouteDescriptor::new(
            Vec::new(),
            "src/pages/index.html",
            RouteType::Page,
            RouteOrigin::Project,
        );
        assert_eq!(descriptor.pattern, "/");
        assert!(descriptor.match_path("/").is_some());
        assert!(descriptor.match_path("").is_some());
        assert!(descriptor.match_path("/about").is_none());
    }

    #[test]
    fn matches_dynamic_segment() {
        let params = route("blog/[slug]")
            .match_path("/blog/hello-world")
            .expect("matches");
        assert_eq!(params.get("slug").map(String::as_str), Some("hello-world"));
        assert!(route("blog/[slug]").match_path("/blog").is_none());
        assert!(route("blog/[slug]").match_path("/blog/a/b").is_none());
    }

    #[test]
    fn matches_mixed_segment() {
        let params = route("post-[id].json")
            .match_path("/post-42.json")
            .expect("matches");
        assert_eq!(params.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn spread_consumes_remaining_segments() {
        let params = route("docs/[...path]")
            .match_path("/docs/guide/install/")
            .expect("matches");
        assert_eq!(
            params.get("path").map(String::as_str),
            Some("guide/install")
        );

        let empty = route("docs/[...path]").match_path("/docs").expect("matches");
        assert_eq!(empty.get("path").map(String::as_str), Some(""));
    }

    #[test]
    fn spread_in_middle_backtracks() {
        let params = route("[...dirs]/edit")
            .match_path("/a/b/edit")
            .expect("matches");
        assert_eq!(params.get("dirs").map(String::as_str), Some("a/b"));
    }

    #[test]
    fn segment_rank_orders_specificity() {
        let literal = parse_segment("about").expect("segment");
        let mixed = parse_segment("post-[id]").expect("segment");
        let dynamic = parse_segment("[id]").expect("segment");
        let spread = parse_segment("[...rest]").expect("segment");
        assert!(segment_rank(&literal) < segment_rank(&mixed));
        assert!(segment_rank(&mixed) < segment_rank(&dynamic));
        assert!(segment_rank(&dynamic) < segment_rank(&spread));
    }
}
