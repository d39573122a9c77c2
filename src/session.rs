//! Session wiring: sync → reconcile → workflow → index
//!
//! A [`TechData`] session owns one working directory for its lifetime. The
//! directory is never deleted by the session so that later sessions can reuse
//! its outputs. Sessions do not share process-global state, but two sessions
//! on the same working directory at the same time are not supported.

use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::fingerprint::{
    ConfigValue, EffectiveConfiguration, FingerprintStore, Overrides, ReconcileOutcome,
};
use crate::index::{Entry, LookupError, ResultIndex};
use crate::repository::{DatasetVersion, RepositorySynchronizer};
use crate::settings::Settings;
use crate::workflow::{WorkflowInvoker, WorkflowOutcome};

/// Inputs for [`TechData::open`]
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Working directory; defaults to `settings.workspace.dir`, then a fresh temporary location
    pub target_dir: Option<PathBuf>,
    pub overrides: Overrides,
    /// Dataset version; defaults to `settings.repository.version`
    pub version: Option<DatasetVersion>,
    pub settings: Settings,
}

impl SessionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.target_dir = Some(dir.into());
        self
    }

    pub fn overrides(mut self, overrides: Overrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn version(mut self, version: impl Into<DatasetVersion>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}

/// A queryable view over one materialized technology-data working directory
#[derive(Debug)]
pub struct TechData {
    working_dir: PathBuf,
    config: EffectiveConfiguration,
    outcome: Option<ReconcileOutcome>,
    workflow: Option<WorkflowOutcome>,
    index: ResultIndex,
}

impl TechData {
    /// Sync the dataset, reconcile the configuration, run the workflow and
    /// load the resulting tables.
    ///
    /// Sync and configuration errors abort; a failed workflow does not.
    pub fn open(options: SessionOptions) -> Result<Self> {
        let SessionOptions {
            target_dir,
            overrides,
            version,
            settings,
        } = options;

        settings.validate()?;
        let version = version.unwrap_or_else(|| settings.repository.version.clone());
        let working_dir = match target_dir.or_else(|| settings.workspace.dir.clone()) {
            Some(dir) => dir,
            None => {
                warn!("Consider specifying a target directory to re-use previous work across sessions");
                temporary_working_dir()?
            }
        };
        // Child processes run inside the working directory, so every path
        // handed to them must not depend on the caller's cwd
        let working_dir = std::path::absolute(&working_dir)?;
        info!(path = %working_dir.display(), "Using working directory to manage technology-data");

        RepositorySynchronizer::new(&settings.repository.git, settings.repository_timeout()?)
            .sync(&settings.repository.url, &working_dir, &version)?;

        let store = FingerprintStore::new(&working_dir, &settings.workspace);
        let reconciliation = store.reconcile(&overrides)?;

        let workflow = WorkflowInvoker::new(
            &settings.workflow.program,
            settings.workflow.jobs,
            settings.workflow_timeout()?,
        )
        .run(&working_dir, store.sidecar_path());

        warn!(
            path = %working_dir.display(),
            "The working directory is not deleted and could take up significant space"
        );

        let index = ResultIndex::build(store.outputs_dir(), &settings.workspace.results_prefix);

        Ok(Self {
            working_dir,
            config: reconciliation.config,
            outcome: Some(reconciliation.outcome),
            workflow: Some(workflow),
            index,
        })
    }

    /// Open an already materialized working directory without syncing or
    /// running the workflow.
    ///
    /// The effective configuration is read from the sidecar when present.
    pub fn from_working_dir(working_dir: impl AsRef<Path>, settings: &Settings) -> Result<Self> {
        let working_dir = working_dir.as_ref().to_path_buf();
        let store = FingerprintStore::new(&working_dir, &settings.workspace);
        let config = match store.load_sidecar()? {
            Some(config) => config,
            None => {
                warn!(
                    path = %store.sidecar_path().display(),
                    "No sidecar configuration; results may rest on unknown assumptions"
                );
                store.load_base()?
            }
        };
        let index = ResultIndex::build(store.outputs_dir(), &settings.workspace.results_prefix);

        Ok(Self {
            working_dir,
            config,
            outcome: None,
            workflow: None,
            index,
        })
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Reconciliation decision taken when the session was opened
    pub fn outcome(&self) -> Option<ReconcileOutcome> {
        self.outcome
    }

    /// Outcome of the workflow run, if one was started
    pub fn workflow(&self) -> Option<&WorkflowOutcome> {
        self.workflow.as_ref()
    }

    pub fn configuration(&self) -> &EffectiveConfiguration {
        &self.config
    }

    pub fn fingerprint(&self) -> String {
        self.config.fingerprint()
    }

    pub fn index(&self) -> &ResultIndex {
        &self.index
    }

    pub fn years(&self) -> Vec<i32> {
        self.index.years()
    }

    pub fn technologies(&self, year: i32) -> Vec<String> {
        self.index.technologies(year)
    }

    pub fn parameters(&self, year: i32, technology: &str) -> Vec<String> {
        self.index.parameters(year, technology)
    }

    pub fn get(&self, year: i32, technology: &str, parameter: &str) -> Option<Entry> {
        self.index.get(year, technology, parameter)
    }

    pub fn lookup(
        &self,
        year: i32,
        technology: &str,
        parameter: &str,
    ) -> std::result::Result<Entry, LookupError> {
        self.index.lookup(year, technology, parameter)
    }

    /// Value of `property` in the effective configuration
    pub fn config(&self, property: &str) -> Option<&ConfigValue> {
        let value = self.config.get(property);
        if value.is_none() {
            warn!(property, "Configuration property is not set");
        }
        value
    }
}

/// A not-yet-existing path inside a fresh, persistent temporary directory
fn temporary_working_dir() -> Result<PathBuf> {
    let parent = tempfile::Builder::new().prefix("techdata-").tempdir()?.keep();
    Ok(parent.join("technology-data"))
}
