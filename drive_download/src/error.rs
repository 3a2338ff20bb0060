//! Error types for the drive_download crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while authenticating against or downloading from Google Drive.
#[derive(Error, Debug)]
pub enum DriveError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Token store {} is corrupt: {reason}", path.display())]
    CorruptToken { path: PathBuf, reason: String },

    #[error("Token refresh failed: {0}")]
    AuthRefresh(String),

    #[error("OAuth error: {0}")]
    OAuth(String),

    #[error("Failed to fetch file listing: {0}")]
    ListingFetch(#[source] Box<DriveError>),

    #[error("Failed to download {name}: {source}")]
    FileTransfer {
        name: String,
        #[source]
        source: Box<DriveError>,
    },

    #[error("Refusing to write file with unsafe name: {0:?}")]
    UnsafeFileName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("JWT encoding error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Result type alias for DriveError.
pub type Result<T> = std::result::Result<T, DriveError>;
