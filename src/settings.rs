use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::repository::DatasetVersion;

/// Name of the per-project settings file searched for by [`discover_settings`]
pub const SETTINGS_FILE: &str = "techdata.toml";

/// Complete techdata settings (loaded from a TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub repository: RepositorySettings,

    #[serde(default)]
    pub workflow: WorkflowSettings,

    #[serde(default)]
    pub workspace: WorkspaceSettings,
}

/// Where the dataset comes from and how it is fetched
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositorySettings {
    /// Git URL of the dataset repository
    #[serde(default = "default_repository_url")]
    pub url: String,

    /// Dataset version: "latest" or a tag/branch name
    #[serde(default)]
    pub version: DatasetVersion,

    /// Git executable
    #[serde(default = "default_git")]
    pub git: String,

    /// Timeout for a single clone or pull (e.g., "10m")
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            url: default_repository_url(),
            version: DatasetVersion::Latest,
            git: default_git(),
            timeout: None,
        }
    }
}

/// External workflow runner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSettings {
    /// Workflow executable
    #[serde(default = "default_workflow_program")]
    pub program: String,

    /// Number of parallel jobs handed to the runner
    #[serde(default = "default_jobs")]
    pub jobs: u32,

    /// Timeout for the whole workflow run (e.g., "6h")
    #[serde(default)]
    pub timeout: Option<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            program: default_workflow_program(),
            jobs: default_jobs(),
            timeout: None,
        }
    }
}

/// Working directory layout
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkspaceSettings {
    /// Working directory; a temporary location is used when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Base configuration shipped with the dataset (relative to the working directory)
    #[serde(default = "default_base_config")]
    pub base_config: String,

    /// Sidecar recording the configuration of the last run
    #[serde(default = "default_sidecar")]
    pub sidecar: String,

    /// Directory holding the per-year result tables
    #[serde(default = "default_outputs")]
    pub outputs: String,

    /// Result table prefix; tables are named `<prefix>_<YYYY>.csv`
    #[serde(default = "default_results_prefix")]
    pub results_prefix: String,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            dir: None,
            base_config: default_base_config(),
            sidecar: default_sidecar(),
            outputs: default_outputs(),
            results_prefix: default_results_prefix(),
        }
    }
}

fn default_repository_url() -> String {
    "https://github.com/PyPSA/technology-data.git".to_string()
}

fn default_git() -> String {
    "git".to_string()
}

fn default_workflow_program() -> String {
    "snakemake".to_string()
}

fn default_jobs() -> u32 {
    1
}

fn default_base_config() -> String {
    "config.yaml".to_string()
}

fn default_sidecar() -> String {
    "__config.yaml".to_string()
}

fn default_outputs() -> String {
    "outputs".to_string()
}

fn default_results_prefix() -> String {
    "costs".to_string()
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).with_context(|| {
            format!("Failed to read settings file: {}", path.as_ref().display())
        })?;

        let settings: Settings = toml::from_str(&content).with_context(|| {
            format!("Failed to parse settings file: {}", path.as_ref().display())
        })?;

        Ok(settings)
    }

    /// Load settings with discovery and environment overrides
    ///
    /// Precedence: env vars > settings file > defaults. When `explicit_path`
    /// is `None` the settings file is discovered from the current directory.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => {
                let current_dir = std::env::current_dir()
                    .context("Failed to get current directory for settings discovery")?;
                match discover_settings(&current_dir) {
                    Some(path) => {
                        tracing::info!(path = %path.display(), "Using settings file");
                        Self::from_file(&path)?
                    }
                    None => {
                        tracing::debug!("No settings file found, using defaults");
                        Self::default()
                    }
                }
            }
        };

        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    /// Overlay `TECHDATA_*` environment variables
    pub fn apply_env(&mut self) {
        if let Some(url) = env_var("TECHDATA_REPOSITORY_URL") {
            self.repository.url = url;
        }
        if let Some(version) = env_var("TECHDATA_VERSION") {
            self.repository.version = DatasetVersion::from(version.as_str());
        }
        if let Some(git) = env_var("TECHDATA_GIT") {
            self.repository.git = git;
        }
        if let Some(dir) = env_var("TECHDATA_WORKSPACE_DIR") {
            self.workspace.dir = Some(PathBuf::from(dir));
        }
        if let Some(program) = env_var("TECHDATA_WORKFLOW_PROGRAM") {
            self.workflow.program = program;
        }
        if let Some(timeout) = env_var("TECHDATA_WORKFLOW_TIMEOUT") {
            self.workflow.timeout = Some(timeout);
        }
    }

    /// Validate settings
    pub fn validate(&self) -> Result<()> {
        if self.repository.url.is_empty() {
            anyhow::bail!("repository.url must be set");
        }

        if self.repository.git.is_empty() {
            anyhow::bail!("repository.git must be set");
        }

        if self.workflow.program.is_empty() {
            anyhow::bail!("workflow.program must be set");
        }

        if self.workflow.jobs == 0 {
            anyhow::bail!("workflow.jobs must be at least 1");
        }

        self.repository_timeout()
            .context("repository.timeout is invalid")?;
        self.workflow_timeout()
            .context("workflow.timeout is invalid")?;

        let ws = &self.workspace;
        for (name, value) in [
            ("workspace.base_config", &ws.base_config),
            ("workspace.sidecar", &ws.sidecar),
            ("workspace.outputs", &ws.outputs),
            ("workspace.results_prefix", &ws.results_prefix),
        ] {
            if value.is_empty() {
                anyhow::bail!("{} must be set", name);
            }
        }

        if ws.sidecar == ws.base_config {
            anyhow::bail!("workspace.sidecar must differ from workspace.base_config");
        }

        if ws.results_prefix.contains(['/', '\\']) {
            anyhow::bail!("workspace.results_prefix must not contain path separators");
        }

        Ok(())
    }

    pub fn repository_timeout(&self) -> Result<Option<Duration>> {
        self.repository.timeout.as_deref().map(parse_duration).transpose()
    }

    pub fn workflow_timeout(&self) -> Result<Option<Duration>> {
        self.workflow.timeout.as_deref().map(parse_duration).transpose()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Discover a settings file by walking up from `start_dir`
///
/// Falls back to the global `$XDG_CONFIG_HOME/techdata/config.toml`.
pub fn discover_settings(start_dir: &Path) -> Option<PathBuf> {
    let mut current = Some(start_dir);

    while let Some(dir) = current {
        let candidate = dir.join(SETTINGS_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        current = dir.parent();
    }

    dirs::config_dir()
        .map(|config| config.join("techdata").join("config.toml"))
        .filter(|global| global.is_file())
}

/// Parse a duration such as "30s", "10m", "2h" or "1d"
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("Empty duration string"));
    }

    let unit_start = s.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    let (num_str, unit) = s.split_at(unit_start);
    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid duration: {}", s))?;

    let multiplier = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(anyhow!("Invalid duration unit: {}. Use: s, m, h, d", unit)),
    };
    let seconds = num
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow!("Duration too large: {}", s))?;

    Ok(Duration::from_secs(seconds))
}
