/// Workflow invoker
///
/// Runs the external workflow (snakemake by default) against the effective
/// configuration. The child is started with an explicit working directory,
/// so the process-wide current directory is never touched.
use std::path::Path;
use std::time::Duration;
use tracing::{error, info};

use crate::logging::{operations, status};
use crate::process::ProcessRunner;

/// Outcome of one workflow run; a failed run is a value, not an error
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
}

impl WorkflowOutcome {
    fn launch_failure(program: &str, message: String) -> Self {
        Self {
            success: false,
            exit_code: None,
            timed_out: false,
            duration: Duration::ZERO,
            stdout: String::new(),
            stderr: format!("failed to launch {}: {}", program, message),
        }
    }
}

/// Invokes the external workflow runner
#[derive(Debug, Clone)]
pub struct WorkflowInvoker {
    runner: ProcessRunner,
    jobs: u32,
}

impl WorkflowInvoker {
    pub fn new(program: impl Into<String>, jobs: u32, timeout: Option<Duration>) -> Self {
        Self {
            runner: ProcessRunner::new(program, timeout),
            jobs: jobs.max(1),
        }
    }

    /// Arguments passed to the runner for `config_path`
    fn args(&self, config_path: &Path) -> Vec<std::ffi::OsString> {
        vec![
            format!("-j{}", self.jobs).into(),
            "--configfile".into(),
            config_path.as_os_str().to_owned(),
        ]
    }

    /// Run the workflow inside `working_dir` with `config_path`.
    ///
    /// Never fails: launch errors, non-zero exits and timeouts are reported
    /// through the returned outcome and logged with the captured output.
    pub fn run(&self, working_dir: &Path, config_path: &Path) -> WorkflowOutcome {
        info!(
            operation = operations::WORKFLOW,
            program = self.runner.program(),
            jobs = self.jobs,
            dir = %working_dir.display(),
            "Starting workflow"
        );

        let outcome = match self.runner.run(self.args(config_path).as_slice(), Some(working_dir)) {
            Ok(output) => WorkflowOutcome {
                success: output.success(),
                exit_code: output.exit_code,
                timed_out: output.timed_out,
                duration: output.duration,
                stdout: output.stdout,
                stderr: output.stderr,
            },
            Err(e) => WorkflowOutcome::launch_failure(self.runner.program(), e.to_string()),
        };

        if outcome.success {
            info!(
                operation = operations::WORKFLOW,
                status = status::SUCCESS,
                duration_ms = outcome.duration.as_millis() as u64,
                "Workflow done"
            );
        } else {
            error!(
                operation = operations::WORKFLOW,
                status = status::ERROR,
                exit_code = ?outcome.exit_code,
                timed_out = outcome.timed_out,
                "Workflow failed; continuing with whatever outputs exist"
            );
            error!("Workflow stdout:\n{}", outcome.stdout);
            error!("Workflow stderr:\n{}", outcome.stderr);
        }

        outcome
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn fake_runner(dir: &Path, body: &str) -> String {
        let path = dir.join("fake-snakemake");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    #[serial]
    fn test_run_passes_single_job_and_configfile() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let program = fake_runner(bin.path(), r#"echo "$@" > args.txt"#);

        let outcome = WorkflowInvoker::new(program, 1, None)
            .run(work.path(), &work.path().join("__config.yaml"));

        assert!(outcome.success);
        let args = fs::read_to_string(work.path().join("args.txt")).unwrap();
        assert!(args.starts_with("-j1 --configfile "));
        assert!(args.trim_end().ends_with("__config.yaml"));
    }

    #[test]
    #[serial]
    fn test_failed_run_is_reported_not_raised() {
        let bin = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let program = fake_runner(bin.path(), "echo 'MissingInputException' >&2; exit 1");
        let before = std::env::current_dir().unwrap();

        let outcome = WorkflowInvoker::new(program, 1, None)
            .run(work.path(), &work.path().join("__config.yaml"));

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(1));
        assert!(outcome.stderr.contains("MissingInputException"));
        assert_eq!(std::env::current_dir().unwrap(), before);
    }

    #[test]
    #[serial]
    fn test_missing_program_is_reported() {
        let work = TempDir::new().unwrap();
        let outcome = WorkflowInvoker::new("/nonexistent/snakemake", 1, None)
            .run(work.path(), &work.path().join("__config.yaml"));

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, None);
        assert!(outcome.stderr.contains("failed to launch"));
    }
}
