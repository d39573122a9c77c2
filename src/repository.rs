// Dataset repository synchronization
//
// Ensures the working directory holds a git working copy of the dataset at
// the requested version, cloning on first use and pulling afterwards.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::logging::{operations, status};
use crate::process::ProcessRunner;

/// Version of the dataset to check out
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DatasetVersion {
    /// Tip of the default branch; may give different data on every sync
    #[default]
    Latest,
    /// A tag or branch name (e.g. "v0.6.2")
    Tag(String),
}

impl DatasetVersion {
    pub const LATEST: &'static str = "latest";

    pub fn is_latest(&self) -> bool {
        matches!(self, DatasetVersion::Latest)
    }
}

impl From<&str> for DatasetVersion {
    fn from(value: &str) -> Self {
        let value = value.trim();
        if value.is_empty() || value == Self::LATEST {
            DatasetVersion::Latest
        } else {
            DatasetVersion::Tag(value.to_string())
        }
    }
}

impl From<String> for DatasetVersion {
    fn from(value: String) -> Self {
        DatasetVersion::from(value.as_str())
    }
}

impl From<DatasetVersion> for String {
    fn from(version: DatasetVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Display for DatasetVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetVersion::Latest => f.write_str(Self::LATEST),
            DatasetVersion::Tag(tag) => f.write_str(tag),
        }
    }
}

/// Keeps a local working copy of the dataset repository up to date
#[derive(Debug, Clone)]
pub struct RepositorySynchronizer {
    git: ProcessRunner,
}

impl RepositorySynchronizer {
    pub fn new(git: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            git: ProcessRunner::new(git, timeout),
        }
    }

    /// Ensure `path` contains a working copy of `url` at `version`.
    ///
    /// A missing or empty `path` is cloned into; an existing one is pulled.
    /// Any failure of the underlying git invocation is fatal.
    pub fn sync(&self, url: &str, path: &Path, version: &DatasetVersion) -> Result<()> {
        if version.is_latest() {
            warn!(
                "Consider pinning the dataset to a specific version; 'latest' may yield different data on every sync"
            );
        }

        if needs_clone(path)? {
            info!(path = %path.display(), version = %version, "Cloning dataset repository");
            fs::create_dir_all(path)?;

            let mut args: Vec<OsString> = vec!["clone".into(), url.into()];
            if let DatasetVersion::Tag(tag) = version {
                args.push("--branch".into());
                args.push(tag.into());
            }
            args.push(path.as_os_str().to_owned());

            self.git_checked(operations::CLONE, url, &args)
        } else {
            info!(path = %path.display(), version = %version, "Updating dataset repository");

            let mut args: Vec<OsString> = vec!["-C".into(), path.as_os_str().to_owned(), "pull".into()];
            if let DatasetVersion::Tag(tag) = version {
                args.push(url.into());
                args.push(tag.into());
            }

            self.git_checked(operations::PULL, url, &args)
        }
    }

    fn git_checked(&self, operation: &'static str, url: &str, args: &[OsString]) -> Result<()> {
        let output = self.git.run(args, None).map_err(|e| Error::Sync {
            operation,
            url: url.to_string(),
            code: None,
            stderr: format!("failed to launch {}: {}", self.git.program(), e),
        })?;

        if !output.success() {
            let stderr = if output.timed_out {
                format!("timed out after {:.1}s", output.duration.as_secs_f64())
            } else {
                output.stderr.trim().to_string()
            };
            tracing::error!(
                operation,
                status = status::ERROR,
                url,
                exit_code = ?output.exit_code,
                "git {} failed: {}",
                operation,
                stderr
            );
            return Err(Error::Sync {
                operation,
                url: url.to_string(),
                code: output.exit_code,
                stderr,
            });
        }

        info!(
            operation,
            status = status::SUCCESS,
            duration_ms = output.duration.as_millis() as u64,
            "git {} done",
            operation
        );
        Ok(())
    }
}

/// A path needs a fresh clone when it does not exist or is an empty directory
fn needs_clone(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(true);
    }
    if path.is_dir() {
        return Ok(fs::read_dir(path)?.next().is_none());
    }
    Ok(false)
}
