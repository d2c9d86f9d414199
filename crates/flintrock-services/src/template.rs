//! Config file template rendering
//!
//! Service configuration files are tera templates embedded in the binary and
//! rendered with a one-off context per node.

use crate::error::{Result, ServiceError};
use tera::{Context, Tera};

/// One-shot template renderer.
pub struct TemplateEngine {
    tera: Tera,
    context: Context,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self {
            tera: Tera::default(),
            context: Context::new(),
        }
    }

    /// Add a variable to the rendering context.
    pub fn insert(&mut self, key: &str, value: &impl serde::Serialize) -> &mut Self {
        self.context.insert(key, value);
        self
    }

    /// Render a template string against the accumulated context.
    pub fn render(&mut self, template: &str) -> Result<String> {
        self.tera
            .render_str(template, &self.context)
            .map_err(|e| ServiceError::Template(template_error_detail(&e)))
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk the tera error chain; the root cause (e.g. the undefined variable
/// name) is usually buried a level or two down.
fn template_error_detail(e: &tera::Error) -> String {
    use std::error::Error;

    let mut details = vec![e.to_string()];
    let mut source = e.source();
    while let Some(err) = source {
        details.push(err.to_string());
        source = err.source();
    }
    details.join(": ")
}
