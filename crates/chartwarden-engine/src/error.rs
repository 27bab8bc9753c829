//! Engine error types

use thiserror::Error;

/// Result type for rendering operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur during chart rendering
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// Template parse or render error
    #[error("template '{template}': {message}")]
    Template { template: String, message: String },

    /// Chart loading error
    #[error("chart error: {0}")]
    Chart(#[from] chartwarden_core::CoreError),

    /// Owner injection or other YAML post-processing failed
    #[error("invalid manifest in '{file}': {message}")]
    InvalidManifest { file: String, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Build a template error from a MiniJinja error, keeping the line number
    pub(crate) fn from_minijinja(err: minijinja::Error, template: &str) -> Self {
        let message = match err.line() {
            Some(line) => format!("{} (line {})", err, line),
            None => err.to_string(),
        };
        Self::Template {
            template: template.to_string(),
            message,
        }
    }
}
