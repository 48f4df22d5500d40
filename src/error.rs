//! Error types for the VQA toolkit.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, VqaError>;

/// Errors that can occur anywhere in the pipeline.
#[derive(Error, Debug)]
pub enum VqaError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An image could not be opened or decoded.
    #[error("Failed to read image '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// File content is not valid JSON or not a supported layout.
    #[error("Malformed data in '{path}': {message}")]
    Format { path: PathBuf, message: String },

    /// No credential could be resolved for the text-generation service.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The text-generation service failed or returned an unusable response.
    #[error("Upstream API error: {0}")]
    Upstream(String),

    /// The vision-language model could not be loaded.
    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    /// Generation or decoding failed.
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Mismatched lengths, unknown columns, out-of-domain values.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration file error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A figure could not be rendered.
    #[error("Failed to render figure: {0}")]
    Render(String),
}

impl VqaError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create an image error with path context.
    pub fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }

    /// Create a format error with path context.
    pub fn format(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Format {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

impl From<reqwest::Error> for VqaError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VqaError::Upstream(format!("request timed out: {}", err))
        } else {
            VqaError::Upstream(err.to_string())
        }
    }
}
