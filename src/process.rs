/// Blocking subprocess execution
///
/// Spawns an external program with an explicit working directory, drains its
/// output on helper threads and optionally enforces a timeout.
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

/// Captured result of a finished (or killed) subprocess
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    /// Exit code, `None` when the process was killed by a signal or timed out
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CapturedOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

/// Subprocess runner for one external program
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    program: String,
    timeout: Option<Duration>,
}

impl ProcessRunner {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Resolve the program from PATH, falling back to the name as given
    fn resolve(&self) -> PathBuf {
        which::which(&self.program).unwrap_or_else(|e| {
            debug!(
                program = %self.program,
                "could not find program in PATH ({}), trying as-is", e
            );
            PathBuf::from(&self.program)
        })
    }

    /// Run the program with `args`, optionally inside `cwd`.
    ///
    /// Only spawn failures and wait failures are returned as errors; a
    /// non-zero exit or a timeout is reported through [`CapturedOutput`].
    pub fn run<S: AsRef<std::ffi::OsStr>>(
        &self,
        args: &[S],
        cwd: Option<&Path>,
    ) -> io::Result<CapturedOutput> {
        let start = Instant::now();
        let mut cmd = Command::new(self.resolve());
        cmd.args(args);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("Command: {:?}", cmd);

        let mut child = cmd.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (status, timed_out) = match self.timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout)?,
            None => (Some(child.wait()?), false),
        };

        if timed_out {
            warn!(
                program = %self.program,
                timeout_secs = self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                "process timed out and was killed"
            );
        }

        Ok(CapturedOutput {
            exit_code: status.and_then(|s| s.code()),
            duration: start.elapsed(),
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
            timed_out,
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn join_reader(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

/// Wait for the child, killing it once `timeout` has elapsed
fn wait_with_timeout(
    child: &mut Child,
    timeout: Duration,
) -> io::Result<(Option<ExitStatus>, bool)> {
    let start = Instant::now();

    loop {
        match child.try_wait()? {
            Some(status) => return Ok((Some(status), false)),
            None => {
                if start.elapsed() >= timeout {
                    child.kill()?;
                    // Reap zombie
                    child.wait()?;
                    return Ok((None, true));
                }
                thread::sleep(Duration::from_millis(50));
            }
        }
    }
}
