//! Error types for hass-eink.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while configuring, rendering or serving pages.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or invalid. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The browser could not be launched. Fatal at startup.
    #[error("Failed to launch browser: {0}")]
    SessionLaunch(String),

    /// A browser operation failed (navigation, screenshot, script evaluation, ...)
    #[error("Browser error: {0}")]
    Browser(String),

    /// A browser operation did not finish within its time budget
    #[error("Timed out after {0}ms while {1}")]
    Timeout(u128, &'static str),

    /// Image post-processing failed
    #[error("Image conversion failed: {0}")]
    PostProcess(String),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(String),

    /// No rendered image exists at the given location
    #[error("No image found at {}", .0.display())]
    NotFound(PathBuf),

    /// HTTP request failed (network error, timeout, etc.)
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Remote endpoint returned an error status code
    #[error("API returned error status {status}: {body}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        body: String,
    },

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Request(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
