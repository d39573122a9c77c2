use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort session construction.
///
/// Query-time misses are never reported through this type; see
/// [`crate::index::LookupError`].
#[derive(Error, Debug)]
pub enum Error {
    /// A clone or update of the dataset repository failed
    #[error("git {operation} of {url} failed{}: {stderr}", exit_suffix(.code))]
    Sync {
        operation: &'static str,
        url: String,
        code: Option<i32>,
        stderr: String,
    },

    /// The sidecar file recording the previous run's configuration is unreadable
    #[error("Sidecar configuration is corrupt: {}: {message}", .path.display())]
    ConfigCorruption { path: PathBuf, message: String },

    /// The dataset's shipped configuration could not be parsed
    #[error("Failed to parse base configuration {}: {message}", .path.display())]
    BaseConfig { path: PathBuf, message: String },

    /// An override names a key the base configuration does not define
    #[error("Unknown configuration key '{0}' (not defined by the base configuration)")]
    UnknownOverride(String),

    #[error("Failed to read results table {}: {source}", .path.display())]
    Table {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    /// Settings file could not be loaded or failed validation
    #[error(transparent)]
    Settings(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

fn exit_suffix(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {}", code),
        None => " without an exit code".to_string(),
    }
}
