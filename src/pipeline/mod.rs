//! Drop-folder pipeline: audio files in, scored result records out.
//!
//! Each pass walks the inbox in file-name order and runs every new audio
//! file through transcribe → score → timeline → outbox. A file counts as
//! new when the outbox has no artifact for it carrying its current content
//! fingerprint.
//!
//! State per run:
//!
//! ```text
//! one-shot:   Idle → Scanning → Processing* → Idle
//! continuous: Idle → Scanning → Processing* → Waiting → Scanning → …
//! ```
//!
//! Per-file failures become error records and never stop the loop. Files
//! that look like they are still being written are deferred to a later scan
//! and, after `max_retries` deferrals, recorded as transcription failures.
//! Files that vanish mid-scan are skipped. Files that cannot be read are
//! recorded once, keyed by size and mtime instead of content. A file whose
//! artifact cannot be written is retried up to `max_retries` times and then
//! left alone until restart; its result never reaches the timeline.

pub mod ledger;
pub mod outbox;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, PipelineError, PipelineResult};
use crate::record::{ErrorKind, RecordError, ResultRecord};
use crate::shield::Shield;
use crate::stt::audio::SUPPORTED_EXTENSIONS;
use crate::timeline::DEFAULT_SOURCE;

use self::ledger::Ledger;

/// Separator between the source id and the rest of a file name.
pub const SOURCE_SEPARATOR: &str = "__";

/// Subdirectories of the inbox used when archiving.
pub const PROCESSED_DIR: &str = "processed";
pub const FAILED_DIR: &str = "failed";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// `[pipeline]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_inbox")]
    pub inbox: PathBuf,
    #[serde(default = "default_outbox")]
    pub outbox: PathBuf,
    /// Seconds between scans in continuous mode.
    #[serde(default = "default_poll_secs")]
    pub poll_secs: u64,
    /// Files modified more recently than this are treated as still being written.
    #[serde(default = "default_settle_secs")]
    pub settle_secs: u64,
    /// Deferrals of a transient file before it is recorded as failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Move handled files into `processed/` or `failed/` under the inbox.
    #[serde(default)]
    pub archive: bool,
}

fn default_inbox() -> PathBuf {
    PathBuf::from("inbox")
}
fn default_outbox() -> PathBuf {
    PathBuf::from("outbox")
}
fn default_poll_secs() -> u64 {
    5
}
fn default_settle_secs() -> u64 {
    1
}
fn default_max_retries() -> u32 {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inbox: default_inbox(),
            outbox: default_outbox(),
            poll_secs: default_poll_secs(),
            settle_secs: default_settle_secs(),
            max_retries: default_max_retries(),
            archive: false,
        }
    }
}

impl PipelineConfig {
    /// Config rooted at explicit directories, other fields default.
    pub fn with_dirs(inbox: impl Into<PathBuf>, outbox: impl Into<PathBuf>) -> Self {
        Self {
            inbox: inbox.into(),
            outbox: outbox.into(),
            ..Default::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_secs)
    }

    pub fn settle_window(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.poll_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.poll_secs".into(),
                value: "0".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.inbox == self.outbox {
            return Err(ConfigError::InvalidValue {
                key: "pipeline.outbox".into(),
                value: self.outbox.display().to_string(),
                message: "must differ from the inbox".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Stop signal
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag for the watch loop.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    /// Slice length for interruptible sleeps.
    const SLICE: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag on SIGINT and SIGTERM.
    pub fn register_os_signals(&self) -> std::io::Result<()> {
        for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.0))?;
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep up to `duration`, waking early once stopped. Returns whether
    /// the signal is set.
    pub fn wait(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(Self::SLICE.min(deadline - now));
        }
        self.is_stopped()
    }
}

// ---------------------------------------------------------------------------
// Reports and state
// ---------------------------------------------------------------------------

/// Watcher state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Scanning,
    Processing,
    Waiting,
}

/// What happened to one inbox file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    /// Scored; artifact written.
    Processed,
    /// Error record written.
    Failed,
    /// Already processed with the same content.
    Skipped,
    /// Still being written or locked; retried on a later scan.
    Deferred,
}

/// Counts for one or more scan passes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub deferred: usize,
}

impl ScanReport {
    fn count(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Processed => self.processed += 1,
            FileOutcome::Failed => self.failed += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Deferred => self.deferred += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.processed + self.failed + self.skipped + self.deferred
    }
}

impl std::ops::AddAssign for ScanReport {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.deferred += other.deferred;
    }
}

impl std::fmt::Display for ScanReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} processed, {} failed, {} skipped, {} deferred",
            self.processed, self.failed, self.skipped, self.deferred
        )
    }
}

// ---------------------------------------------------------------------------
// Drop folder
// ---------------------------------------------------------------------------

/// Source id encoded in a file name: `<source>__<rest>.<ext>`.
pub fn source_id_for(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|stem| stem.split_once(SOURCE_SEPARATOR))
        .filter(|(source, rest)| !source.trim().is_empty() && !rest.is_empty())
        .map(|(source, _)| source.trim().to_string())
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string())
}

fn is_supported_audio(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// I/O failures worth retrying on a later scan.
fn is_transient_io(kind: std::io::ErrorKind) -> bool {
    use std::io::ErrorKind::*;
    matches!(kind, WouldBlock | Interrupted | TimedOut | ResourceBusy)
}

/// Error message with its I/O cause, if any.
fn describe(err: &PipelineError) -> String {
    match std::error::Error::source(err) {
        Some(source) => format!("{err}: {source}"),
        None => err.to_string(),
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Inbox watcher bound to a [`Shield`].
pub struct DropFolder<'a> {
    shield: &'a mut Shield,
    config: PipelineConfig,
    ledger: Ledger,
    state: PipelineState,
}

impl<'a> DropFolder<'a> {
    /// Create the outbox if needed and rebuild the ledger from it.
    pub fn new(shield: &'a mut Shield, config: PipelineConfig) -> PipelineResult<Self> {
        std::fs::create_dir_all(&config.outbox).map_err(|e| PipelineError::io(&config.outbox, e))?;
        let ledger = Ledger::from_outbox(&config.outbox)?;
        Ok(Self {
            shield,
            config,
            ledger,
            state: PipelineState::Idle,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn set_state(&mut self, state: PipelineState) {
        if self.state != state {
            tracing::debug!(from = ?self.state, to = ?state, "pipeline state");
            self.state = state;
        }
    }

    /// One scan pass, then back to `Idle`.
    pub fn run_once(&mut self) -> PipelineResult<ScanReport> {
        let report = self.scan_pass(None);
        self.set_state(PipelineState::Idle);
        let report = report?;
        tracing::info!(%report, inbox = %self.config.inbox.display(), "scan complete");
        Ok(report)
    }

    /// Scan, wait, repeat until `stop` is set. Scan errors (for example a
    /// missing inbox) are logged and retried on the next poll.
    pub fn watch(&mut self, stop: &StopSignal) -> ScanReport {
        tracing::info!(
            inbox = %self.config.inbox.display(),
            outbox = %self.config.outbox.display(),
            poll_secs = self.config.poll_secs,
            "watching inbox"
        );

        let mut total = ScanReport::default();
        while !stop.is_stopped() {
            match self.scan_pass(Some(stop)) {
                Ok(report) => {
                    if report.processed + report.failed > 0 {
                        tracing::info!(%report, "scan complete");
                    }
                    total += report;
                }
                Err(e) => tracing::warn!(error = %e, "inbox scan failed"),
            }
            if stop.is_stopped() {
                break;
            }
            self.set_state(PipelineState::Waiting);
            stop.wait(self.config.poll_interval());
        }

        self.set_state(PipelineState::Idle);
        tracing::info!(%total, "watcher stopped");
        total
    }

    /// Audio files in the inbox, sorted by file name.
    fn list_inbox(&self) -> PipelineResult<Vec<PathBuf>> {
        let inbox = &self.config.inbox;
        let entries = std::fs::read_dir(inbox).map_err(|e| PipelineError::io(inbox, e))?;
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|p| p.is_file() && !is_hidden(p) && is_supported_audio(p))
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        Ok(files)
    }

    fn scan_pass(&mut self, stop: Option<&StopSignal>) -> PipelineResult<ScanReport> {
        self.set_state(PipelineState::Scanning);
        let files = self.list_inbox()?;
        let mut report = ScanReport::default();
        for path in files {
            if stop.is_some_and(StopSignal::is_stopped) {
                break;
            }
            report.count(self.process_file(&path));
        }
        Ok(report)
    }

    /// Run one file to completion. Never fails: problems become error
    /// records or deferrals.
    ///
    /// A file counts toward its source's timeline only once its artifact is
    /// in the outbox. When even the outbox write fails, nothing is recorded
    /// and the file is retried on later scans, up to `max_retries` times.
    pub fn process_file(&mut self, path: &Path) -> FileOutcome {
        let artifact = outbox::artifact_name(path);
        let fingerprint = match ledger::fingerprint(path) {
            Ok(fingerprint) => fingerprint,
            Err(e) => return self.unreadable(path, &artifact, &e),
        };
        if self.ledger.is_processed(&artifact, &fingerprint) {
            tracing::debug!(file = %path.display(), "already processed");
            return FileOutcome::Skipped;
        }
        if let Err(e) = self.check_settled(path) {
            if e.io_kind() == Some(std::io::ErrorKind::NotFound) {
                tracing::debug!(file = %path.display(), "file vanished before processing");
                return FileOutcome::Skipped;
            }
            return self.defer_or_give_up(path, &artifact, &fingerprint, &e);
        }

        self.set_state(PipelineState::Processing);
        let source_id = source_id_for(path);

        match self.shield.evaluate_audio(path, &source_id, None) {
            Ok(assessment) => {
                let record = ResultRecord::for_audio(path, &fingerprint, &assessment);
                if self.persist(path, &artifact, &fingerprint, &record) {
                    self.shield.commit_audio(&assessment);
                    FileOutcome::Processed
                } else {
                    FileOutcome::Failed
                }
            }
            Err(e) if e.is_transient() => {
                let e = PipelineError::TransientFile {
                    path: path.display().to_string(),
                    message: e.to_string(),
                };
                self.defer_or_give_up(path, &artifact, &fingerprint, &e)
            }
            Err(e) => {
                let attempts = self.ledger.attempts(&artifact) + 1;
                let record = ResultRecord::failed_file(
                    path,
                    &fingerprint,
                    &source_id,
                    RecordError::from_stt(&e, attempts),
                );
                self.persist(path, &artifact, &fingerprint, &record);
                FileOutcome::Failed
            }
        }
    }

    /// The content could not be hashed. Vanished files are skipped; other
    /// files are keyed by size and mtime so the failure is recorded once.
    fn unreadable(&mut self, path: &Path, artifact: &str, cause: &PipelineError) -> FileOutcome {
        let kind = cause.io_kind();
        if kind == Some(std::io::ErrorKind::NotFound) {
            tracing::debug!(file = %path.display(), "file vanished before processing");
            return FileOutcome::Skipped;
        }
        let Some(stamp) = ledger::metadata_fingerprint(path) else {
            tracing::debug!(file = %path.display(), "file vanished before processing");
            return FileOutcome::Skipped;
        };
        if self.ledger.is_processed(artifact, &stamp) {
            return FileOutcome::Skipped;
        }
        if kind.is_some_and(is_transient_io) {
            return self.defer_or_give_up(path, artifact, &stamp, cause);
        }

        let attempts = self.ledger.attempts(artifact) + 1;
        let record = ResultRecord::failed_file(
            path,
            &stamp,
            &source_id_for(path),
            RecordError::new(ErrorKind::Io, describe(cause), attempts),
        );
        self.persist(path, artifact, &stamp, &record);
        FileOutcome::Failed
    }

    /// Empty files and files modified inside the settle window are still
    /// being written.
    fn check_settled(&self, path: &Path) -> PipelineResult<()> {
        let meta = std::fs::metadata(path).map_err(|e| PipelineError::io(path, e))?;
        let transient = |message: String| PipelineError::TransientFile {
            path: path.display().to_string(),
            message,
        };
        if meta.len() == 0 {
            return Err(transient("file is empty".into()));
        }
        let settle = self.config.settle_window();
        if let Ok(modified) = meta.modified() {
            // Future mtimes (clock skew) count as settled.
            if let Ok(age) = SystemTime::now().duration_since(modified) {
                if age < settle {
                    return Err(transient(format!("modified {}ms ago", age.as_millis())));
                }
            }
        }
        Ok(())
    }

    fn defer_or_give_up(
        &mut self,
        path: &Path,
        artifact: &str,
        fingerprint: &str,
        cause: &PipelineError,
    ) -> FileOutcome {
        let attempts = self.ledger.bump_attempts(artifact);
        if attempts <= self.config.max_retries {
            tracing::info!(
                file = %path.display(),
                attempts,
                max_retries = self.config.max_retries,
                reason = %describe(cause),
                "deferred"
            );
            return FileOutcome::Deferred;
        }

        let kind = match ErrorKind::from(cause) {
            ErrorKind::TransientFile => ErrorKind::Transcription,
            other => other,
        };
        let record = ResultRecord::failed_file(
            path,
            fingerprint,
            &source_id_for(path),
            RecordError::new(
                kind,
                format!("gave up after {attempts} attempts: {}", describe(cause)),
                attempts,
            ),
        );
        self.persist(path, artifact, fingerprint, &record);
        FileOutcome::Failed
    }

    /// [`finish`](Self::finish), counting a failed write as an attempt.
    /// Past `max_retries` the file is left alone until restart. Returns
    /// whether the artifact was written.
    fn persist(
        &mut self,
        path: &Path,
        artifact: &str,
        fingerprint: &str,
        record: &ResultRecord,
    ) -> bool {
        let Err(e) = self.finish(path, artifact, fingerprint, record) else {
            return true;
        };
        let attempts = self.ledger.bump_attempts(artifact);
        if attempts > self.config.max_retries {
            tracing::error!(
                file = %path.display(),
                attempts,
                error = %describe(&e),
                "could not record result; not retrying until restart"
            );
            self.ledger.give_up(artifact, path, fingerprint);
        } else {
            tracing::warn!(
                file = %path.display(),
                attempts,
                error = %describe(&e),
                "could not record result; will retry"
            );
        }
        false
    }

    /// Write the artifact, mark the file processed, archive it.
    fn finish(
        &mut self,
        path: &Path,
        artifact: &str,
        fingerprint: &str,
        record: &ResultRecord,
    ) -> PipelineResult<()> {
        let written = outbox::write_record(&self.config.outbox, artifact, record)?;
        self.ledger.mark_processed(artifact, path, fingerprint);

        match &record.error {
            Some(error) => tracing::warn!(
                file = %path.display(),
                kind = error.kind.as_str(),
                error = %error.message,
                "recorded failure"
            ),
            None => tracing::info!(
                file = %path.display(),
                artifact = %written.display(),
                score = record.score.as_ref().map_or(0.0, |s| s.raw_score),
                escalated = record.verdict.as_ref().is_some_and(|v| v.escalated),
                call_risk = record.conversation.as_ref().map_or(0.0, |c| c.risk_score),
                "processed"
            ),
        }

        if self.config.archive {
            let sub = if record.is_error() { FAILED_DIR } else { PROCESSED_DIR };
            self.archive(path, sub);
        }
        Ok(())
    }

    fn archive(&self, path: &Path, sub: &str) {
        let Some(file_name) = path.file_name() else {
            return;
        };
        let dir = self.config.inbox.join(sub);
        let moved = std::fs::create_dir_all(&dir).and_then(|_| std::fs::rename(path, dir.join(file_name)));
        if let Err(e) = moved {
            tracing::warn!(file = %path.display(), dest = %dir.display(), error = %e, "archive failed");
        }
    }
}
