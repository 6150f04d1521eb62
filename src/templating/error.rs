//! Template error types

use regex::Regex;
use std::error::Error as _;
use std::sync::OnceLock;
use thiserror::Error;

/// Name under which every analyzed template is registered with tera.
pub(crate) const TEMPLATE_NAME: &str = "__rill_template";

/// Errors raised while analyzing or resolving a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The text is not a well-formed template
    #[error("template syntax error: {message}")]
    Syntax {
        message: String,
        line: Option<usize>,
    },

    /// A well-formed template failed while rendering (missing variable, bad call)
    #[error("template rendering failed: {message}")]
    Render {
        message: String,
        line: Option<usize>,
    },

    /// A template function was called with arguments it does not accept
    #[error("invalid call to '{function}': {message}")]
    InvalidCall { function: String, message: String },
}

impl TemplateError {
    pub(crate) fn syntax(error: &tera::Error) -> Self {
        TemplateError::Syntax {
            message: format_tera_error(error),
            line: extract_line(error),
        }
    }

    pub(crate) fn render(error: &tera::Error) -> Self {
        TemplateError::Render {
            message: format_tera_error(error),
            line: extract_line(error),
        }
    }

    /// Line number inside the template, when tera reported one.
    #[must_use]
    pub fn line(&self) -> Option<usize> {
        match self {
            TemplateError::Syntax { line, .. } | TemplateError::Render { line, .. } => *line,
            TemplateError::InvalidCall { .. } => None,
        }
    }
}

/// Flattens a tera error chain into one readable message.
///
/// Tera nests the useful detail in `source()`; the outer messages only name the
/// internal template.
pub(crate) fn format_tera_error(error: &tera::Error) -> String {
    let mut all = vec![error.to_string()];
    let mut current = error.source();
    while let Some(err) = current {
        all.push(err.to_string());
        current = err.source();
    }

    let internal = format!("'{TEMPLATE_NAME}'");
    let messages: Vec<String> = all
        .into_iter()
        .map(|msg| {
            msg.replace(&format!("Failed to parse {internal}"), "")
                .replace(&format!("Failed to render {internal}"), "")
                .replace(&format!("while rendering {internal}"), "")
                .replace(&internal, "template")
                .trim()
                .to_string()
        })
        .filter(|msg| !msg.is_empty())
        .collect();

    if messages.is_empty() {
        "unknown template error".to_string()
    } else {
        messages.join(": ")
    }
}

fn extract_line(error: &tera::Error) -> Option<usize> {
    static LINE_RE: OnceLock<Option<Regex>> = OnceLock::new();
    let re = LINE_RE.get_or_init(|| Regex::new(r"(\d+):(\d+)").ok()).as_ref()?;

    let mut current: Option<&dyn std::error::Error> = Some(error);
    while let Some(err) = current {
        let msg = err.to_string();
        if let Some(line) = re
            .captures(&msg)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<usize>().ok())
        {
            return Some(line);
        }
        current = err.source();
    }
    None
}
