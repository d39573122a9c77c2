//! Configuration fingerprint store
//!
//! Decides whether outputs left in the working directory by a previous run
//! may be reused. The configuration a run was started with is persisted to a
//! sidecar file next to the dataset; on the next session the freshly merged
//! configuration is compared against it as a plain mapping:
//!
//! | sidecar   | overrides | result                                           |
//! |-----------|-----------|--------------------------------------------------|
//! | equal     | any       | outputs reused                                   |
//! | different | any       | `outputs/` removed                               |
//! | missing   | empty     | outputs kept, warning (provenance unknown)       |
//! | missing   | non-empty | `outputs/` removed                               |
//!
//! The merged configuration is written back to the sidecar in every case.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::logging::{operations, status};
use crate::settings::WorkspaceSettings;

/// A single configuration value (scalar, sequence or mapping)
pub type ConfigValue = serde_yaml::Value;

/// Base configuration merged with caller overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectiveConfiguration(BTreeMap<String, ConfigValue>);

impl EffectiveConfiguration {
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }

    /// Overlay `overrides` on `base`; the override wins on every key it names.
    ///
    /// Override keys must exist in `base` unless `base` is empty, in which
    /// case there is nothing to validate against.
    pub fn merge(base: &EffectiveConfiguration, overrides: &Overrides) -> Result<Self> {
        if !base.is_empty() {
            if let Some(unknown) = overrides.keys().find(|key| !base.contains_key(key)) {
                return Err(Error::UnknownOverride(unknown.clone()));
            }
        } else if !overrides.is_empty() {
            warn!("No base configuration to validate overrides against; accepting them as-is");
        }

        let mut merged = base.0.clone();
        for (key, value) in overrides.iter() {
            merged.insert(key.clone(), value.clone());
        }
        Ok(Self(merged))
    }

    /// Short hex digest of the canonical YAML form, for diagnostics only
    pub fn fingerprint(&self) -> String {
        let canonical = serde_yaml::to_string(&self.0).unwrap_or_default();
        let hash = hex::encode(Sha256::digest(canonical.as_bytes()));
        hash[..16].to_string()
    }

    /// Parse a YAML document whose top level is a string-keyed mapping.
    ///
    /// An empty document is an empty configuration.
    pub fn from_yaml(content: &str) -> std::result::Result<Self, String> {
        let value: ConfigValue = serde_yaml::from_str(content).map_err(|e| e.to_string())?;
        match value {
            ConfigValue::Null => Ok(Self::default()),
            ConfigValue::Mapping(mapping) => {
                let mut entries = BTreeMap::new();
                for (key, value) in mapping {
                    match key {
                        ConfigValue::String(key) => {
                            entries.insert(key, value);
                        }
                        other => return Err(format!("non-string top-level key: {:?}", other)),
                    }
                }
                Ok(Self(entries))
            }
            _ => Err("top level is not a mapping".to_string()),
        }
    }

    pub fn to_yaml(&self) -> String {
        serde_yaml::to_string(&self.0).unwrap_or_default()
    }
}

/// Caller-supplied configuration overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides(BTreeMap<String, ConfigValue>);

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }
}

impl<K: Into<String>, V: Into<ConfigValue>> FromIterator<(K, V)> for Overrides {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut overrides = Overrides::new();
        for (key, value) in iter {
            overrides.insert(key, value);
        }
        overrides
    }
}

/// Decision taken when reconciling a new configuration with the working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Sidecar matched: outputs on disk were produced by this configuration
    Reused,
    /// Sidecar differed: stale outputs were discarded
    Invalidated,
    /// No sidecar and no overrides: existing outputs are assumed to be defaults
    Unverified,
    /// No sidecar but overrides given: outputs were discarded defensively
    ForcedClean,
}

impl ReconcileOutcome {
    fn status(self) -> &'static str {
        match self {
            ReconcileOutcome::Reused => status::REUSED,
            ReconcileOutcome::Invalidated | ReconcileOutcome::ForcedClean => status::INVALIDATED,
            ReconcileOutcome::Unverified => status::UNVERIFIED,
        }
    }
}

/// Result of [`FingerprintStore::reconcile`]
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub config: EffectiveConfiguration,
    pub outcome: ReconcileOutcome,
    /// Whether an `outputs/` tree actually existed and was removed
    pub outputs_removed: bool,
}

/// Sidecar-backed store for the configuration of the last run
#[derive(Debug, Clone)]
pub struct FingerprintStore {
    working_dir: PathBuf,
    base_config: PathBuf,
    sidecar: PathBuf,
    outputs: PathBuf,
}

impl FingerprintStore {
    pub fn new(working_dir: &Path, layout: &WorkspaceSettings) -> Self {
        Self {
            working_dir: working_dir.to_path_buf(),
            base_config: working_dir.join(&layout.base_config),
            sidecar: working_dir.join(&layout.sidecar),
            outputs: working_dir.join(&layout.outputs),
        }
    }

    pub fn sidecar_path(&self) -> &Path {
        &self.sidecar
    }

    pub fn base_config_path(&self) -> &Path {
        &self.base_config
    }

    pub fn outputs_dir(&self) -> &Path {
        &self.outputs
    }

    /// Load the configuration shipped with the dataset
    pub fn load_base(&self) -> Result<EffectiveConfiguration> {
        let content = match fs::read_to_string(&self.base_config) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(
                    path = %self.base_config.display(),
                    "Dataset ships no base configuration; starting from an empty one"
                );
                return Ok(EffectiveConfiguration::default());
            }
            Err(e) => return Err(e.into()),
        };

        EffectiveConfiguration::from_yaml(&content).map_err(|message| Error::BaseConfig {
            path: self.base_config.clone(),
            message,
        })
    }

    /// Load the configuration recorded by the previous run, if any
    pub fn load_sidecar(&self) -> Result<Option<EffectiveConfiguration>> {
        if !self.sidecar.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.sidecar).map_err(|e| Error::ConfigCorruption {
            path: self.sidecar.clone(),
            message: e.to_string(),
        })?;

        EffectiveConfiguration::from_yaml(&content)
            .map(Some)
            .map_err(|message| Error::ConfigCorruption {
                path: self.sidecar.clone(),
                message,
            })
    }

    /// Merge `overrides` into the base configuration and decide whether the
    /// outputs currently on disk may be reused.
    ///
    /// Stale outputs are removed before returning and the merged
    /// configuration is persisted to the sidecar.
    pub fn reconcile(&self, overrides: &Overrides) -> Result<Reconciliation> {
        let base = self.load_base()?;
        let candidate = EffectiveConfiguration::merge(&base, overrides)?;
        let previous = self.load_sidecar()?;

        let outcome = match &previous {
            Some(previous) if *previous == candidate => ReconcileOutcome::Reused,
            Some(_) => ReconcileOutcome::Invalidated,
            None if overrides.is_empty() => ReconcileOutcome::Unverified,
            None => ReconcileOutcome::ForcedClean,
        };

        let outputs_removed = match outcome {
            ReconcileOutcome::Invalidated | ReconcileOutcome::ForcedClean => {
                self.remove_outputs()?
            }
            ReconcileOutcome::Unverified => {
                if self.outputs.exists() {
                    warn!(
                        path = %self.outputs.display(),
                        "No record of the configuration behind existing outputs; results may rest on unknown assumptions"
                    );
                }
                false
            }
            ReconcileOutcome::Reused => false,
        };

        if previous.as_ref() != Some(&candidate) {
            self.persist(&candidate)?;
        }

        info!(
            operation = operations::RECONCILE,
            status = outcome.status(),
            fingerprint = %candidate.fingerprint(),
            overrides = overrides.len(),
            outputs_removed,
            "Configuration reconciled"
        );

        Ok(Reconciliation {
            config: candidate,
            outcome,
            outputs_removed,
        })
    }

    /// Recursively delete the outputs tree; returns whether anything was removed
    fn remove_outputs(&self) -> Result<bool> {
        match fs::remove_dir_all(&self.outputs) {
            Ok(()) => {
                info!(path = %self.outputs.display(), "Removed stale outputs");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically write `config` to the sidecar
    fn persist(&self, config: &EffectiveConfiguration) -> Result<()> {
        let mut file = tempfile::NamedTempFile::new_in(&self.working_dir)?;
        file.write_all(config.to_yaml().as_bytes())?;
        file.persist(&self.sidecar).map_err(|e| e.error)?;
        debug!(path = %self.sidecar.display(), "Sidecar configuration written");
        Ok(())
    }
}
