//! Bounded execution of external recognizer and decoder binaries.
//!
//! Binaries run directly (no shell). Output goes to temporary files rather
//! than pipes so a chatty child can never block on a full pipe while we poll
//! it for the deadline.

use std::ffi::OsString;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

/// Poll interval while waiting for a child.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bytes of stderr kept for error messages.
const MAX_STDERR_BYTES: usize = 4 * 1024;

/// A prepared command line.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub timeout: Duration,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

/// How a child run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Finished {
        status: ExitStatus,
        stdout: String,
        stderr: String,
    },
    TimedOut,
}

/// Run `invocation` in `workdir`, killing it once the timeout elapses.
///
/// Spawn and wait failures are returned as `io::Error`; a non-zero exit is
/// reported through [`RunOutcome::Finished`].
pub fn run(invocation: &Invocation, workdir: &Path) -> std::io::Result<RunOutcome> {
    let mut stdout_file = tempfile::tempfile()?;
    let mut stderr_file = tempfile::tempfile()?;

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(stdout_file.try_clone()?)
        .stderr(stderr_file.try_clone()?)
        .spawn()?;

    tracing::debug!(command = %invocation.display(), "spawned");

    let deadline = Instant::now() + invocation.timeout;
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    tracing::warn!(
                        command = %invocation.display(),
                        secs = invocation.timeout.as_secs(),
                        "child timed out and was killed"
                    );
                    return Ok(RunOutcome::TimedOut);
                }
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    };

    let stdout = read_back(&mut stdout_file, usize::MAX)?;
    let stderr = read_back(&mut stderr_file, MAX_STDERR_BYTES)?;
    Ok(RunOutcome::Finished {
        status,
        stdout,
        stderr,
    })
}

fn read_back(file: &mut std::fs::File, limit: usize) -> std::io::Result<String> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    let text = String::from_utf8_lossy(&buf);
    if text.len() <= limit {
        return Ok(text.into_owned());
    }
    // Keep the tail: recognizers print the fatal line last.
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    Ok(format!("...{}", &text[start..]))
}

/// Condense stderr into one line for error messages.
pub fn summarize_failure(status: ExitStatus, stderr: &str) -> String {
    let last = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("no output");
    match status.code() {
        Some(code) => format!("exit code {code}: {last}"),
        None => format!("terminated by signal: {last}"),
    }
}
