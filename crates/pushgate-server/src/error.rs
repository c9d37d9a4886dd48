//! Server error types.

use std::{io, path::PathBuf};

use pushgate_core::StorageError;
use pushgate_proto::ProtocolError;
use thiserror::Error;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Config file is not valid TOML for [`crate::ServerConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config parsed but a value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors raised while starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration problem
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Storage backend failed
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A response could not be encoded
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A key in the config could not be loaded
    #[error("invalid key material: {0}")]
    Key(String),

    /// A push provider could not be set up
    #[error("provider setup failed: {0}")]
    Provider(String),
}
