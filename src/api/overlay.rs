//! Token-gated overlay page.
//!
//! The page is only released for a token that currently resolves. The token
//! id is injected as `window.OVERLAY_TOKEN` so the page's script can call
//! `GET /api/token/:tokenId` itself.

use super::AppState;
use crate::tokens::ResolveError;
use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;

/// Built-in overlay page
const BUILTIN_TEMPLATE: &str = include_str!("../../assets/overlay.html");

/// Overlay HTML document into which the token id is injected.
pub struct OverlayTemplate {
    html: String,
}

impl OverlayTemplate {
    pub fn builtin() -> Self {
        Self::from_html(BUILTIN_TEMPLATE)
    }

    pub fn from_html(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    /// Reads a template from disk (once, at startup).
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let html = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read overlay template {}", path.display()))?;
        info!(path = %path.display(), "Loaded overlay template");
        Ok(Self::from_html(html))
    }

    /// Renders the page for `token_id`.
    ///
    /// The token script goes right before `</head>` so it runs ahead of any
    /// script in the body; templates without a head get it prepended.
    pub fn render(&self, token_id: &str) -> String {
        let script = format!(
            "<script>window.OVERLAY_TOKEN = {};</script>",
            js_string_literal(token_id)
        );

        // ASCII lowercasing keeps byte offsets intact
        match self.html.to_ascii_lowercase().find("</head>") {
            Some(idx) => {
                let mut html = String::with_capacity(self.html.len() + script.len());
                html.push_str(&self.html[..idx]);
                html.push_str(&script);
                html.push_str(&self.html[idx..]);
                html
            }
            None => format!("{}{}", script, self.html),
        }
    }
}

/// Quotes `value` as a JavaScript string literal that is safe inside `<script>`.
fn js_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' | '\u{2029}' => out.push_str(&format!("\\u{:04x}", c as u32)),
            c if c.is_control() => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn error_page(title: &str, heading: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
    <head><title>{title}</title></head>
    <body style="text-align: center; padding: 50px; font-family: Arial;">
        <h2>{heading}</h2>
        <p>{message}</p>
        <a href="/">&larr; Back to Login</a>
    </body>
</html>
"#
    )
}

/// GET /overlay/:tokenId
pub(super) async fn render_overlay(
    State(state): State<Arc<AppState>>,
    Path(token_id): Path<String>,
) -> Response {
    match state.token_service.resolve_now(&token_id) {
        Ok(_) => (
            [(header::CACHE_CONTROL, "no-store")],
            Html(state.overlay_template.render(&token_id)),
        )
            .into_response(),
        Err(ResolveError::NotFound) => (
            StatusCode::NOT_FOUND,
            Html(error_page(
                "Invalid Link",
                "Invalid Overlay Link",
                "This overlay link is invalid or has been removed.",
            )),
        )
            .into_response(),
        Err(ResolveError::Expired) => (
            StatusCode::UNAUTHORIZED,
            Html(error_page(
                "Expired Link",
                "Overlay Link Expired",
                "This overlay link has expired. Please generate a new one.",
            )),
        )
            .into_response(),
        Err(ResolveError::DecryptFailure(_)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(error_page(
                "Overlay Unavailable",
                "Overlay Unavailable",
                "This overlay could not be loaded. Please generate a new link.",
            )),
        )
            .into_response(),
    }
}
