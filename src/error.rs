//! Error Types
//!
//! Runtime transitions never fail; these errors come from loading
//! definitions and config, and from the `try_*` manager calls.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ObjectiveError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path:?}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("definition '{0}' is declared more than once")]
    DuplicateId(String),

    #[error("group '{group}' references unknown child '{child}'")]
    UnknownChild { group: String, child: String },

    #[error("definition cycle detected at '{0}'")]
    Cycle(String),

    #[error("definition '{child}' is listed under both '{first}' and '{second}'")]
    MultipleParents {
        child: String,
        first: String,
        second: String,
    },

    #[error("objective '{0}' must require at least one success")]
    InvalidThreshold(String),

    #[error("group '{0}' has a delay that is negative or out of range")]
    InvalidDelay(String),

    #[error("'{0}' is not registered")]
    NotRegistered(String),

    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("invalid config: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ObjectiveError>;
