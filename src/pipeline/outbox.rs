//! Outbox artifacts: naming, atomic writes, read-back.

use std::fmt::Write as _;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::error::{PipelineError, PipelineResult};
use crate::record::ResultRecord;

/// Write attempts before giving up on an artifact.
const WRITE_ATTEMPTS: u32 = 3;
const WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// Hex digits of the original file name appended to rewritten names.
const NAME_TAG_BYTES: usize = 4;

/// Deterministic artifact name for an input file.
///
/// Names made only of `[A-Za-z0-9._-]` map to `<file name>.json`. Any other
/// character is replaced by `_` and the name gets a `-<tag>` suffix taken
/// from the SHA-256 of the raw file name, so `my call.wav` and `my_call.wav`
/// never share an artifact. A tagged name ends in hex rather than an audio
/// extension and cannot collide with an untagged one.
pub fn artifact_name(input: &Path) -> String {
    let raw = input.file_name().unwrap_or_default();
    let mut rewritten = false;
    let mut name: String = raw
        .to_string_lossy()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                rewritten = true;
                '_'
            }
        })
        .collect();
    if rewritten {
        let digest = Sha256::digest(raw.as_encoded_bytes());
        name.push('-');
        for byte in &digest[..NAME_TAG_BYTES] {
            let _ = write!(name, "{byte:02x}");
        }
    }
    name.push_str(".json");
    name
}

/// Write `record` to `outbox/name` via a temporary file renamed into place.
///
/// Retries a few times on I/O errors, so a brief sharing violation does not
/// lose a result.
pub fn write_record(outbox_dir: &Path, name: &str, record: &ResultRecord) -> PipelineResult<PathBuf> {
    let json = record.to_json().map_err(|e| PipelineError::Serialize {
        message: e.to_string(),
    })?;
    let target = outbox_dir.join(name);

    let mut attempt = 1;
    loop {
        match write_atomic(outbox_dir, &target, json.as_bytes()) {
            Ok(()) => return Ok(target),
            Err(e) if attempt < WRITE_ATTEMPTS => {
                tracing::warn!(
                    artifact = %target.display(),
                    attempt,
                    error = %e,
                    "outbox write failed, retrying"
                );
                std::thread::sleep(WRITE_BACKOFF * attempt);
                attempt += 1;
            }
            Err(e) => return Err(PipelineError::io(&target, e)),
        }
    }
}

fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".artifact-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Parse every `*.json` artifact in `outbox_dir`. Unreadable or foreign
/// files are logged and skipped.
pub fn read_artifacts(outbox_dir: &Path) -> PipelineResult<Vec<(String, ResultRecord)>> {
    let entries = match std::fs::read_dir(outbox_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(PipelineError::io(outbox_dir, e)),
    };

    let mut artifacts = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") || !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        let parsed = std::fs::read_to_string(&path)
            .map_err(|e| e.to_string())
            .and_then(|s| serde_json::from_str::<ResultRecord>(&s).map_err(|e| e.to_string()));
        match parsed {
            Ok(record) => artifacts.push((name, record)),
            Err(e) => tracing::warn!(artifact = %path.display(), error = %e, "skipping unreadable artifact"),
        }
    }
    artifacts.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(artifacts)
}
