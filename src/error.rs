use std::process::ExitStatus;

use thiserror::Error;

/// Error taxonomy for the dump filter.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("dump format version {found} is not supported (expected 2 or 3)")]
    UnsupportedDumpVersion { found: i64 },

    #[error("malformed record: {0}")]
    MalformedRecord(String),

    #[error("svnlook exited with {status}: {stderr}")]
    RepoQueryError { status: ExitStatus, stderr: String },

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FilterError>;
