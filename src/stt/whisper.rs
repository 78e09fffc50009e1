//! whisper.cpp command-line backend.

use std::path::{Path, PathBuf};

use crate::error::{SttError, SttResult};

use super::process::{self, Invocation, RunOutcome};
use super::{SttBackend, TranscribeOptions, TranscriptResult, audio, segments};

/// Binary names tried on PATH, newest first.
const BINARY_CANDIDATES: &[&str] = &["whisper-cli", "whisper-cpp"];

/// Offline transcription through a local whisper.cpp build and ggml model.
#[derive(Debug, Clone)]
pub struct WhisperCpp {
    binary: Option<PathBuf>,
    model: Option<PathBuf>,
}

impl WhisperCpp {
    pub const NAME: &'static str = "whisper";

    /// Resolve the binary (explicit path or PATH lookup) and keep the model path.
    pub fn new(binary: Option<&Path>, model: Option<&Path>) -> Self {
        let binary = match binary {
            Some(explicit) => which::which(explicit).ok(),
            None => BINARY_CANDIDATES
                .iter()
                .find_map(|name| which::which(name).ok()),
        };
        Self {
            binary,
            model: model.map(Path::to_path_buf),
        }
    }
}

impl SttBackend for WhisperCpp {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        self.binary.is_some() && self.model.as_deref().is_some_and(Path::is_file)
    }

    fn accepts(&self, path: &Path) -> bool {
        audio::is_recognizer_ready(path)
    }

    fn transcribe(&self, path: &Path, options: &TranscribeOptions) -> SttResult<TranscriptResult> {
        let (Some(binary), Some(model)) = (&self.binary, &self.model) else {
            return Err(SttError::BackendUnavailable {
                tried: Self::NAME.to_string(),
            });
        };

        let workdir = tempfile::tempdir()
            .map_err(|e| SttError::transcription(Self::NAME, path, format!("temp dir: {e}")))?;
        let prefix = workdir.path().join("transcript");
        let language = options.language.as_deref().unwrap_or("auto");

        let invocation = Invocation::new(binary, options.timeout)
            .arg("-m")
            .arg(model.as_os_str())
            .arg("-f")
            .arg(path.as_os_str())
            .arg("-l")
            .arg(language)
            .arg("-otxt")
            .arg("-osrt")
            .arg("-of")
            .arg(prefix.as_os_str())
            .arg("-np");

        let outcome = process::run(&invocation, workdir.path())
            .map_err(|e| SttError::transcription(Self::NAME, path, format!("spawn failed: {e}")))?;

        match outcome {
            RunOutcome::TimedOut => Err(SttError::Timeout {
                backend: Self::NAME.to_string(),
                path: path.display().to_string(),
                secs: options.timeout.as_secs(),
            }),
            RunOutcome::Finished { status, stderr, .. } if !status.success() => Err(
                SttError::transcription(Self::NAME, path, process::summarize_failure(status, &stderr)),
            ),
            RunOutcome::Finished { stdout, .. } => {
                let segments = std::fs::read_to_string(prefix.with_extension("srt"))
                    .map(|srt| segments::parse_srt(&srt))
                    .unwrap_or_default();
                let text = if segments.is_empty() {
                    // Older builds skip the output files and only print to stdout.
                    let plain = std::fs::read_to_string(prefix.with_extension("txt"))
                        .unwrap_or(stdout);
                    collapse_lines(&plain)
                } else {
                    segments::join_text(&segments)
                };
                Ok(TranscriptResult {
                    text,
                    backend_name: Self::NAME.to_string(),
                    confidence: None,
                    duration_seconds: None,
                    language: options.language.clone(),
                    segments,
                })
            }
        }
    }
}

/// whisper.cpp emits one segment per line, prefixed with
/// `[00:00:00.000 --> 00:00:02.000]` on stdout.
fn collapse_lines(text: &str) -> String {
    text.lines()
        .map(|line| {
            let line = line.trim();
            match line.strip_prefix('[').and_then(|rest| rest.split_once(']')) {
                Some((stamp, rest)) if stamp.contains("-->") => rest.trim(),
                _ => line,
            }
        })
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_without_model() {
        let backend = WhisperCpp {
            binary: Some(PathBuf::from("/usr/bin/whisper-cli")),
            model: None,
        };
        assert!(!backend.is_available());
        let backend = WhisperCpp {
            binary: None,
            model: Some(PathBuf::from("/models/ggml-base.bin")),
        };
        assert!(!backend.is_available());
    }

    #[test]
    fn segments_are_joined() {
        assert_eq!(
            collapse_lines(" Hello there.\n\n This is your bank. \n"),
            "Hello there. This is your bank."
        );
    }

    #[test]
    fn stdout_timestamps_are_stripped() {
        let stdout = "[00:00:00.000 --> 00:00:02.000]   Hello there.\n\
                      [00:00:02.000 --> 00:00:04.500]   Read me the code.\n";
        assert_eq!(collapse_lines(stdout), "Hello there. Read me the code.");
        assert_eq!(collapse_lines("[music] playing"), "[music] playing");
    }
}
