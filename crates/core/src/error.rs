//! Error types shared across the kiln crates.

use thiserror::Error;

/// Workspace-level error type.
///
/// Backend and renderer crates carry their own error enums; this one covers
/// the concerns that sit below them (configuration, I/O of the host
/// application) and is what those crates convert into at the top level.
#[derive(Error, Debug)]
pub enum Error {
    /// A configuration value is out of range or inconsistent.
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Environment variable present but unparsable.
    #[error("Invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Result type alias using the workspace [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
