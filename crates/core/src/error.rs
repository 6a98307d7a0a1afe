//! Error types for the code interpreter.

use thiserror::Error;

/// Result type alias using the interpreter's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the code interpreter.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{0}")]
    UnsupportedLanguage(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    #[error("Sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    #[error("Output capture failed: {0}")]
    OutputCapture(String),

    // =========================================================================
    // Model Gateway Errors
    // =========================================================================
    #[error("Model provider error: {0}")]
    ModelProvider(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create an unsupported language error.
    pub fn unsupported_language(msg: impl Into<String>) -> Self {
        Self::UnsupportedLanguage(msg.into())
    }

    /// Create a tool execution error.
    pub fn tool_execution(msg: impl Into<String>) -> Self {
        Self::ToolExecution(msg.into())
    }

    /// Create a sandbox unavailable error.
    pub fn sandbox_unavailable(msg: impl Into<String>) -> Self {
        Self::SandboxUnavailable(msg.into())
    }

    /// Create an output capture error.
    pub fn output_capture(msg: impl Into<String>) -> Self {
        Self::OutputCapture(msg.into())
    }

    /// Create a model provider error.
    pub fn model_provider(msg: impl Into<String>) -> Self {
        Self::ModelProvider(msg.into())
    }

    /// The raw message carried by this error, without the category prefix
    /// added by `Display`.
    ///
    /// Upstream providers report rate limiting through the message text
    /// (`"429 Too Many Requests"`), so matchers must see it unprefixed.
    pub fn message(&self) -> String {
        match self {
            Self::InvalidRequest(msg)
            | Self::UnsupportedLanguage(msg)
            | Self::ToolExecution(msg)
            | Self::SandboxUnavailable(msg)
            | Self::OutputCapture(msg)
            | Self::ModelProvider(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes_category() {
        let err = Error::model_provider("429 Too Many Requests");
        assert_eq!(err.to_string(), "Model provider error: 429 Too Many Requests");
    }

    #[test]
    fn test_message_strips_category() {
        let err = Error::model_provider("429 Too Many Requests");
        assert_eq!(err.message(), "429 Too Many Requests");

        let err = Error::unsupported_language("no ruby here");
        assert_eq!(err.message(), "no ruby here");
        assert_eq!(err.to_string(), "no ruby here");
    }

    #[test]
    fn test_message_strips_every_category() {
        let errors = [
            Error::invalid_request("raw"),
            Error::unsupported_language("raw"),
            Error::tool_execution("raw"),
            Error::sandbox_unavailable("raw"),
            Error::output_capture("raw"),
            Error::model_provider("raw"),
        ];
        for err in errors {
            assert_eq!(err.message(), "raw", "{:?}", err);
        }
    }

    #[test]
    fn test_message_falls_back_to_display() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.message(), "I/O error: gone");
    }
}
