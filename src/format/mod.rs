//! Rendering of command results.
//!
//! JSON output is pretty-printed. Text output looks up a named minijinja
//! template and falls back to JSON when the template is missing or fails.

pub mod helpers;
pub mod sink;

use minijinja::Environment;
use serde::Serialize;
use serde_json::Value;

use crate::config::OutputFormat;
use crate::Result;

pub use sink::OutputSink;

/// Built-in text templates, keyed by path.
const TEMPLATES: &[(&str, &str)] = &[
    ("deployment/create", include_str!("templates/deployment/create.tmpl")),
    ("allocator/vacate", include_str!("templates/allocator/vacate.tmpl")),
    ("allocator/maintenance", include_str!("templates/allocator/maintenance.tmpl")),
];

/// Renders a value for display.
pub trait Formatter: Send + Sync {
    /// Render `value`, using the template registered under `path` when applicable.
    fn format(&self, path: &str, value: &Value) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// Pretty JSON with two-space indentation and a trailing newline.
#[derive(Debug, Default)]
pub struct JsonFormatter;

impl Formatter for JsonFormatter {
    fn format(&self, _path: &str, value: &Value) -> Result<String> {
        let mut out = serde_json::to_string_pretty(value)?;
        out.push('\n');
        Ok(out)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}

/// Named text templates with a JSON fallback.
pub struct TextFormatter {
    env: Environment<'static>,
    override_template: Option<String>,
    fallback: JsonFormatter,
}

impl TextFormatter {
    pub fn new(override_template: Option<String>) -> Result<Self> {
        let mut env = Environment::new();
        helpers::register(&mut env);
        for &(name, source) in TEMPLATES {
            env.add_template(name, source)?;
        }
        Ok(Self {
            env,
            override_template: override_template.filter(|t| !t.is_empty()),
            fallback: JsonFormatter,
        })
    }

    fn render(&self, path: &str, value: &Value) -> Result<String> {
        let ctx = minijinja::Value::from_serialize(value);
        let mut out = match &self.override_template {
            Some(template) => self.env.render_str(template, ctx)?,
            None => self.env.get_template(path)?.render(ctx)?,
        };
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

impl Formatter for TextFormatter {
    fn format(&self, path: &str, value: &Value) -> Result<String> {
        match self.render(path, value) {
            Ok(out) => Ok(out),
            Err(e) => {
                tracing::debug!(path = %path, error = %e, "text template failed, falling back to json");
                self.fallback.format(path, value)
            }
        }
    }

    fn name(&self) -> &'static str {
        "text"
    }
}

/// Formatter bound to the device results are written to.
pub struct Output {
    sink: OutputSink,
    formatter: Box<dyn Formatter>,
}

impl Output {
    pub fn new(format: OutputFormat, override_template: Option<String>, sink: OutputSink) -> Result<Self> {
        let formatter: Box<dyn Formatter> = match format {
            OutputFormat::Json => Box::new(JsonFormatter),
            OutputFormat::Text => Box::new(TextFormatter::new(override_template)?),
        };
        Ok(Self { sink, formatter })
    }

    /// Render `value` with the template at `path` and write it out.
    pub fn format<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        tracing::trace!(formatter = self.formatter.name(), path = %path, "rendering output");
        let rendered = self.formatter.format(path, &value)?;
        self.sink.write_block(&rendered)?;
        Ok(())
    }

    /// Write `value` as JSON regardless of the configured format.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let rendered = JsonFormatter.format("", &value)?;
        self.sink.write_block(&rendered)?;
        Ok(())
    }

    pub fn sink(&self) -> &OutputSink {
        &self.sink
    }
}
