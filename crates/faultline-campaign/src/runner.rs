//! One trial against the system under test.
//!
//! The SUT is started as a child process, reads the canonical fault config
//! from stdin and reports newline-delimited JSON on stderr until it prints a
//! `Testcase succeeded` / `Testcase failed` record. The child is then given a
//! grace period to exit on its own before it is killed.

use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use faultline_model::{ConfigError, FaultConfig};
use faultline_trace::{decode_line, Trace};
use thiserror::Error;

const REAP_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to encode fault config: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start SUT `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to capture SUT {0}")]
    Pipe(&'static str),
    #[error("SUT I/O error: {0}")]
    Io(#[from] io::Error),
}

/// How to launch the system under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SutCommand {
    pub program: String,
    /// Arguments placed before the liveness flag.
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    /// Forwarded to the SUT as `--liveness-timeout=<secs>s`.
    pub liveness_timeout: Duration,
    /// How long the child may linger after its terminal record.
    pub grace_period: Duration,
}

impl Default for SutCommand {
    fn default() -> Self {
        Self {
            program: "go".into(),
            args: vec![
                "run".into(),
                "./cmd/server.go".into(),
                "run-instance".into(),
            ],
            dir: None,
            liveness_timeout: Duration::from_secs(60),
            grace_period: Duration::from_secs(30),
        }
    }
}

impl SutCommand {
    pub fn argv(&self) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.push(format!(
            "--liveness-timeout={}s",
            self.liveness_timeout.as_secs()
        ));
        argv
    }
}

/// Everything a trial produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrialOutcome {
    pub trace: Trace,
    /// `None` when the stream ended without a terminal record.
    pub verdict: Option<bool>,
    /// The child outlived the grace period and was killed.
    pub killed: bool,
}

/// Runs fault configs to a verdict.
pub trait TrialExecutor {
    fn execute(&mut self, config: &FaultConfig) -> Result<TrialOutcome, RunnerError>;
}

/// Executes trials by spawning the SUT once per config.
#[derive(Debug, Clone, Default)]
pub struct SubprocessRunner {
    command: SutCommand,
}

impl SubprocessRunner {
    pub fn new(command: SutCommand) -> Self {
        Self { command }
    }

    pub fn command(&self) -> &SutCommand {
        &self.command
    }

    fn spawn(&self) -> Result<Child, RunnerError> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(self.command.argv())
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        if let Some(dir) = &self.command.dir {
            cmd.current_dir(dir);
        }
        cmd.spawn().map_err(|source| RunnerError::Spawn {
            program: self.command.program.clone(),
            source,
        })
    }

    fn collect(&self, child: &mut Child, payload: &str) -> Result<(Trace, Option<bool>), RunnerError> {
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or(RunnerError::Pipe("stdin"))?;
            match stdin.write_all(payload.as_bytes()).and_then(|()| stdin.flush()) {
                Ok(()) => {}
                // The child may exit before reading its input; its stderr
                // still decides the trial.
                Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                    tracing::warn!("SUT closed stdin before reading the config");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let stderr = child
            .stderr
            .take()
            .ok_or(RunnerError::Pipe("stderr"))?;
        let mut reader = BufReader::new(stderr);
        let mut trace = Trace::new();
        let mut buf = Vec::new();
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                return Ok((trace, None));
            }
            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match decode_line(line) {
                Ok(entry) => {
                    tracing::debug!(target: "sut", "{line}");
                    let verdict = entry.event.verdict();
                    trace.push(entry);
                    if let Some(verdict) = verdict {
                        return Ok((trace, Some(verdict.passed())));
                    }
                }
                Err(e) => tracing::warn!("discarding SUT output {line:?}: {e}"),
            }
        }
    }
}

impl TrialExecutor for SubprocessRunner {
    fn execute(&mut self, config: &FaultConfig) -> Result<TrialOutcome, RunnerError> {
        let payload = config.canonical_json()?;
        let mut child = self.spawn()?;
        let collected = self.collect(&mut child, &payload);
        let killed = reap(&mut child, self.command.grace_period)?;
        let (trace, verdict) = collected?;
        Ok(TrialOutcome {
            trace,
            verdict,
            killed,
        })
    }
}

/// Wait up to `grace` for the child to exit, then kill it. Returns whether
/// the child had to be killed.
fn reap(child: &mut Child, grace: Duration) -> Result<bool, RunnerError> {
    let deadline = Instant::now() + grace;
    loop {
        if let Some(status) = child.try_wait()? {
            tracing::debug!(%status, "SUT exited");
            return Ok(false);
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(REAP_POLL);
    }
    tracing::warn!(
        pid = child.id(),
        grace_secs = grace.as_secs_f64(),
        "SUT still running after grace period, killing"
    );
    if let Err(e) = child.kill() {
        // Exited between the last poll and the kill.
        if e.kind() != io::ErrorKind::InvalidInput {
            return Err(e.into());
        }
    }
    child.wait()?;
    Ok(true)
}
