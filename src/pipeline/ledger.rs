//! Processed-file bookkeeping for the drop folder.
//!
//! The ledger is rebuilt from the outbox at startup: every artifact stores the
//! fingerprint of the audio it was produced from, so a file whose artifact
//! already carries its current fingerprint is skipped.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};
use crate::record::RecordSource;

use super::outbox;

/// A file that produced an outbox artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedFileRecord {
    pub file_path: PathBuf,
    pub fingerprint: String,
    pub processed_at: DateTime<Utc>,
}

/// Processed files keyed by artifact name, plus retry counters.
#[derive(Debug, Default)]
pub struct Ledger {
    processed: HashMap<String, ProcessedFileRecord>,
    attempts: HashMap<String, u32>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the artifacts already in `outbox`.
    pub fn from_outbox(outbox_dir: &Path) -> PipelineResult<Self> {
        let mut ledger = Self::new();
        for (name, record) in outbox::read_artifacts(outbox_dir)? {
            let Some(fingerprint) = record.fingerprint() else {
                continue;
            };
            let file_path = match &record.source {
                RecordSource::File { path, .. } => PathBuf::from(path),
                RecordSource::Text { .. } => continue,
            };
            ledger.processed.insert(
                name,
                ProcessedFileRecord {
                    file_path,
                    fingerprint: fingerprint.to_string(),
                    processed_at: record.timestamp,
                },
            );
        }
        tracing::debug!(
            entries = ledger.processed.len(),
            outbox = %outbox_dir.display(),
            "ledger rebuilt from outbox"
        );
        Ok(ledger)
    }

    pub fn is_processed(&self, artifact: &str, fingerprint: &str) -> bool {
        self.processed
            .get(artifact)
            .is_some_and(|r| r.fingerprint == fingerprint)
    }

    pub fn get(&self, artifact: &str) -> Option<&ProcessedFileRecord> {
        self.processed.get(artifact)
    }

    pub fn mark_processed(&mut self, artifact: &str, file_path: &Path, fingerprint: &str) {
        self.attempts.remove(artifact);
        self.processed.insert(
            artifact.to_string(),
            ProcessedFileRecord {
                file_path: file_path.to_path_buf(),
                fingerprint: fingerprint.to_string(),
                processed_at: Utc::now(),
            },
        );
    }

    /// Stop retrying `artifact` at this fingerprint for the rest of the run.
    /// Nothing is written, so a restart tries the file again.
    pub fn give_up(&mut self, artifact: &str, file_path: &Path, fingerprint: &str) {
        tracing::debug!(artifact, file = %file_path.display(), "giving up until restart");
        self.mark_processed(artifact, file_path, fingerprint);
    }

    /// Count one more attempt for `artifact` and return the total.
    pub fn bump_attempts(&mut self, artifact: &str) -> u32 {
        let count = self.attempts.entry(artifact.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn attempts(&self, artifact: &str) -> u32 {
        self.attempts.get(artifact).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.processed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processed.is_empty()
    }
}

/// SHA-256 of the file content, lowercase hex. Streams the file.
pub fn fingerprint(path: &Path) -> PipelineResult<String> {
    let mut file = std::fs::File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| PipelineError::io(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Stand-in fingerprint for a file whose content cannot be read, built from
/// its size and modification time. `None` if the file is gone.
///
/// It never equals a content fingerprint, so the file is processed again
/// once it becomes readable.
pub fn metadata_fingerprint(path: &Path) -> Option<String> {
    let meta = std::fs::metadata(path).ok()?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos());
    Some(format!("meta:{}:{modified}", meta.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_tracks_content() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        std::fs::write(&a, b"same bytes").unwrap();
        std::fs::write(&b, b"same bytes").unwrap();
        assert_eq!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());

        std::fs::write(&b, b"other bytes").unwrap();
        assert_ne!(fingerprint(&a).unwrap(), fingerprint(&b).unwrap());
        assert_eq!(fingerprint(&a).unwrap().len(), 64);
    }

    #[test]
    fn empty_file_has_known_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        std::fs::write(&path, b"").unwrap();
        assert_eq!(
            fingerprint(&path).unwrap(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn processed_requires_matching_fingerprint() {
        let mut ledger = Ledger::new();
        ledger.mark_processed("call.wav.json", Path::new("/in/call.wav"), "abc");
        assert!(ledger.is_processed("call.wav.json", "abc"));
        assert!(!ledger.is_processed("call.wav.json", "def"));
        assert!(!ledger.is_processed("other.wav.json", "abc"));
    }

    #[test]
    fn metadata_fingerprint_differs_from_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        std::fs::write(&path, b"abc").unwrap();
        let stamp = metadata_fingerprint(&path).unwrap();
        assert!(stamp.starts_with("meta:3:"), "{stamp}");
        assert_ne!(stamp, fingerprint(&path).unwrap());
        assert!(metadata_fingerprint(&dir.path().join("gone.wav")).is_none());
    }

    #[test]
    fn marking_clears_attempts() {
        let mut ledger = Ledger::new();
        assert_eq!(ledger.bump_attempts("x.json"), 1);
        assert_eq!(ledger.bump_attempts("x.json"), 2);
        ledger.mark_processed("x.json", Path::new("x.wav"), "f");
        assert_eq!(ledger.attempts("x.json"), 0);
    }
}
