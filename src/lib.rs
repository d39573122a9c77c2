//! techdata - a cached, queryable view over the technology-data cost tables
//!
//! A session clones (or updates) the dataset repository, reconciles the
//! requested configuration with the one recorded by the previous run, runs
//! the dataset's workflow and loads the resulting per-year tables:
//!
//! ```no_run
//! use techdata::{Overrides, SessionOptions, TechData};
//!
//! # fn main() -> techdata::Result<()> {
//! techdata::logging::init();
//!
//! let data = TechData::open(
//!     SessionOptions::new()
//!         .target_dir("tmpdir")
//!         .version("v0.6.2")
//!         .overrides(Overrides::new().with("expectation", "optimist")),
//! )?;
//!
//! for parameter in data.parameters(2030, "solar") {
//!     println!("{parameter}");
//! }
//! if let Some(lifetime) = data.get(2030, "solar", "lifetime") {
//!     println!("{:?} {:?}", lifetime.value, lifetime.unit);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod fingerprint;
pub mod index;
pub mod logging;
pub mod process;
pub mod repository;
pub mod session;
pub mod settings;
pub mod workflow;

pub use error::{Error, Result};
pub use fingerprint::{
    ConfigValue, EffectiveConfiguration, FingerprintStore, Overrides, ReconcileOutcome,
    Reconciliation,
};
pub use index::{Entry, LookupError, ResultIndex, ResultTable, Row};
pub use repository::{DatasetVersion, RepositorySynchronizer};
pub use session::{SessionOptions, TechData};
pub use settings::{discover_settings, Settings};
pub use workflow::{WorkflowInvoker, WorkflowOutcome};
