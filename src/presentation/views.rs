use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::error;

use crate::application::bridge::{RenderFailure, SourceLocation, escape_for_module};
use crate::application::error::ErrorReport;

/// Developer overlay shown in place of a page whose render failed.
#[derive(Template)]
#[template(path = "error_overlay.html")]
pub struct ErrorOverlayTemplate {
    pub path: String,
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub loc: Option<SourceLocation>,
    pub hint: Option<String>,
    /// Failure as JSON, safe to embed in a `<script>` element.
    pub payload_json: String,
    pub path_json: String,
    pub events_url: String,
}

impl ErrorOverlayTemplate {
    pub fn new(path: &str, failure: &RenderFailure, events_url: &str) -> Self {
        let payload_json = serde_json::to_string(failure).unwrap_or_else(|_| "null".to_string());
        let path_json = serde_json::to_string(path).unwrap_or_else(|_| "null".to_string());
        Self {
            path: path.to_string(),
            name: failure.name.clone(),
            message: failure.message.clone(),
            stack: failure.stack.clone(),
            loc: failure.loc.clone(),
            hint: failure.hint.clone(),
            payload_json: escape_for_module(&payload_json),
            path_json: escape_for_module(&path_json),
            events_url: events_url.to_string(),
        }
    }
}

/// Fallback page for paths no route matches.
#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate<'a> {
    pub path: &'a str,
}

/// Document shell around rendered Markdown. `body` is trusted HTML.
#[derive(Template)]
#[template(path = "markdown_page.html")]
pub struct MarkdownPageTemplate<'a> {
    pub title: Option<&'a str>,
    pub body: &'a str,
}

impl<'a> MarkdownPageTemplate<'a> {
    /// Title taken from the first top-level heading of the source.
    pub fn new(source: &'a str, body: &'a str) -> Self {
        let title = source
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(str::trim)
            .filter(|title| !title.is_empty());
        Self { title, body }
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, askama::Error> {
    template.render().map(Html)
}

/// Overlay page for `failure`. Falls back to plain text if the template
/// itself cannot render.
pub fn render_failure_overlay(
    path: &str,
    failure: &RenderFailure,
    events_url: &str,
    status: StatusCode,
) -> Response {
    let mut response = match render_template(ErrorOverlayTemplate::new(path, failure, events_url))
    {
        Ok(html) => (status, html).into_response(),
        Err(err) => {
            error!(
                target = "vellum::http::response",
                error = %err,
                "Error overlay template failed to render"
            );
            (status, failure.to_string()).into_response()
        }
    };
    ErrorReport::from_message(
        "presentation::views::render_failure_overlay",
        status,
        failure.to_string(),
    )
    .attach(&mut response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_escapes_failure_text() {
        let failure = RenderFailure::new("<script>alert(1)</script>")
            .with_location("src/pages/index.md", 4, 2)
            .with_hint("close the tag");
        let html = render_template(ErrorOverlayTemplate::new(
            "/",
            &failure,
            "/__vellum/events",
        ))
        .expect("render")
        .0;

        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("src/pages/index.md:4:2"));
        assert!(html.contains("close the tag"));
        assert!(html.contains("/__vellum/events"));
    }

    #[test]
    fn not_found_page_escapes_the_path() {
        let html = render_template(NotFoundTemplate {
            path: "/<img src=x onerror=alert(1)>",
        })
        .expect("render")
        .0;

        assert!(html.contains("404: Not found"));
        assert!(html.contains("&lt;img"));
        assert!(!html.contains("<img"));
    }

    #[test]
    fn markdown_shell_keeps_body_and_escapes_title() {
        let html = render_template(MarkdownPageTemplate::new(
            "# Fish & <Chips>\n\nText\n",
            "<h1>Fish &amp; &lt;Chips&gt;</h1>\n",
        ))
        .expect("render")
        .0;

        assert!(html.contains("<h1>Fish &amp; &lt;Chips&gt;</h1>"));
        assert!(html.contains("<title>Fish &amp; &lt;Chips&gt;</title>"));
    }

    #[test]
    fn overlay_response_carries_report() {
        let response = render_failure_overlay(
            "/broken",
            &RenderFailure::new("boom"),
            "/__vellum/events",
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }
}
