use std::sync::Arc;

use htmd::HtmlToMarkdown;
use quarry_core::error::AppError;

/// Converts HTML listing descriptions into plain Markdown text.
///
/// Non-content elements (script, style, iframe, ...) are dropped entirely.
#[derive(Clone)]
pub struct HtmlCleaner {
    converter: Arc<HtmlToMarkdown>,
}

impl HtmlCleaner {
    pub fn new() -> Self {
        let converter = HtmlToMarkdown::builder()
            .skip_tags(vec!["script", "style", "noscript", "iframe", "svg", "img"])
            .build();

        Self {
            converter: Arc::new(converter),
        }
    }

    pub fn clean(&self, html: &str) -> Result<String, AppError> {
        self.converter
            .convert(html)
            .map(|md| md.trim().to_string())
            .map_err(|e| AppError::ParseError(format!("HTML conversion failed: {e}")))
    }

    /// Like [`clean`](Self::clean), keeping the raw input when conversion fails.
    pub fn clean_or_raw(&self, html: &str) -> String {
        self.clean(html).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Keeping unconverted description");
            html.trim().to_string()
        })
    }
}

impl Default for HtmlCleaner {
    fn default() -> Self {
        Self::new()
    }
}
