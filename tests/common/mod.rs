// Common test utilities shared across session tests
//
// ## Test Isolation Strategy
//
// Each test builds its own `Harness`: a temp directory holding fake `git`
// and `snakemake` executables plus the working directory they operate on.
// The fakes append every invocation to a per-harness log file, so tests can
// assert on what was run and in which order without touching the network
// or any shared location. All paths are baked into the scripts and no
// environment variables are involved.
//
// Tests that use a harness are still `#[serial]`: writing an executable
// while another test thread forks can make exec fail with ETXTBSY, and the
// relative-path test changes the process working directory.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use techdata::{FingerprintStore, Settings};

pub const REPO_URL: &str = "https://example.invalid/technology-data.git";

pub const BASE_CONFIG: &str = "\
rate: 0.07
expectation: ''
years:
- 2030
- 2040
";

pub const COSTS: &str = "\
technology,parameter,value,unit,source,further description,currency_year
solar,investment,492.5,EUR/kWel,DEA,utility-scale,2020
solar,lifetime,40.0,years,DEA,,2020
solar,FOM,1.9,%/year,DEA,,2020
onwind,investment,1035.5,EUR/kWel,DEA,,2020
onwind,lifetime,30.0,years,DEA,,2020
";

pub const COSTS_AMBIGUOUS: &str = "\
technology,parameter,value,unit,source,further description
solar,lifetime,40.0,years,DEA,
solar,lifetime,35.0,years,IEA,
solar,investment,492.5,EUR/kWel,DEA,
";

/// Isolated fake toolchain plus working directory
pub struct Harness {
    temp: TempDir,
    pub work: PathBuf,
    log: PathBuf,
    bin: PathBuf,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_data(BASE_CONFIG, COSTS)
    }

    /// Harness whose fake clone ships `base_config` and whose fake workflow
    /// writes `costs` for 2030 and 2040
    pub fn with_data(base_config: &str, costs: &str) -> Self {
        let _ = techdata::logging::try_init();

        let temp = TempDir::new().expect("Failed to create temp dir");
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).expect("Failed to create bin dir");
        let log = temp.path().join("invocations.log");
        fs::write(&log, "").expect("Failed to create log");

        let harness = Self {
            work: temp.path().join("technology-data"),
            temp,
            log,
            bin,
        };

        harness.write_git(base_config, 0);
        harness.write_workflow(costs, 0);
        harness
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        settings.repository.url = REPO_URL.to_string();
        settings.repository.git = self.bin.join("git").to_string_lossy().into_owned();
        settings.workflow.program = self.bin.join("snakemake").to_string_lossy().into_owned();
        settings
    }

    pub fn store(&self) -> FingerprintStore {
        FingerprintStore::new(&self.work, &self.settings().workspace)
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Make every git invocation fail
    pub fn fail_git(&self) {
        self.write_git(BASE_CONFIG, 128);
    }

    /// Make the workflow write its outputs, then exit non-zero
    pub fn fail_workflow(&self) {
        self.write_workflow(COSTS, 1);
    }

    /// Lines appended by the fake tools, in order
    pub fn log(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .expect("Failed to read log")
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.log().iter().filter(|line| line.starts_with(prefix)).count()
    }

    pub fn clear_log(&self) {
        fs::write(&self.log, "").expect("Failed to clear log");
    }

    fn write_git(&self, base_config: &str, exit_code: i32) {
        let script = format!(
            r#"#!/bin/sh
echo "git $*" >> '{log}'
if [ {exit_code} -ne 0 ]; then
  echo "fatal: could not read from remote repository" >&2
  exit {exit_code}
fi
if [ "$1" = "clone" ]; then
  for dir; do :; done
  mkdir -p "$dir"
  cat > "$dir/config.yaml" <<'TECHDATA_EOF'
{base_config}TECHDATA_EOF
fi
exit 0
"#,
            log = self.log.display(),
        );
        install(&self.bin.join("git"), &script);
    }

    fn write_workflow(&self, costs: &str, exit_code: i32) {
        let script = format!(
            r#"#!/bin/sh
echo "snakemake $*" >> '{log}'
if [ ! -f "$3" ]; then
  echo "configfile $3 not found in $(pwd)" >&2
  exit 1
fi
echo "config $(grep '^rate' "$3")" >> '{log}'
if [ -e outputs/marker ]; then
  echo "outputs preserved" >> '{log}'
fi
mkdir -p outputs
cat > outputs/costs_2030.csv <<'TECHDATA_EOF'
{costs}TECHDATA_EOF
cp outputs/costs_2030.csv outputs/costs_2040.csv
touch outputs/marker
echo "Building DAG of jobs..."
exit {exit_code}
"#,
            log = self.log.display(),
        );
        install(&self.bin.join("snakemake"), &script);
    }
}

fn install(path: &Path, script: &str) {
    fs::write(path, script).expect("Failed to write fake tool");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .expect("Failed to make fake tool executable");
}
