//! Error types shared by the core and the frontend.

use std::path::PathBuf;

use thiserror::Error;

/// A startup configuration value was missing or out of range.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config value `{name}` is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("config value `{name}` is required")]
    Missing { name: &'static str },
}

impl ConfigError {
    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Loading an image, sound or tilemap failed. Always names the file.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("incorrect image dimensions in {}: {width}x{height} (height must be a multiple of width)", path.display())]
    BadDimensions {
        path: PathBuf,
        width: u32,
        height: u32,
    },
    #[error("bad tilemap format in {}: {reason}", path.display())]
    BadTilemap { path: PathBuf, reason: String },
    #[error("can't convert audio in {}: {reason}", path.display())]
    UnsupportedAudio { path: PathBuf, reason: String },
    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },
}

impl ResourceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ResourceError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn decode(path: impl Into<PathBuf>, message: impl ToString) -> Self {
        ResourceError::Decode {
            path: path.into(),
            message: message.to_string(),
        }
    }
}
