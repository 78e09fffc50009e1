//! Vosk backend via the `vosk-transcriber` command.

use std::path::{Path, PathBuf};

use crate::error::{SttError, SttResult};

use super::process::{self, Invocation, RunOutcome};
use super::{SttBackend, TranscribeOptions, TranscriptResult, audio, segments};

const DEFAULT_BINARY: &str = "vosk-transcriber";

/// Offline transcription with a local Vosk model directory.
///
/// The model must be present on disk; `vosk-transcriber` would otherwise try
/// to download one.
#[derive(Debug, Clone)]
pub struct Vosk {
    binary: Option<PathBuf>,
    model_dir: Option<PathBuf>,
}

impl Vosk {
    pub const NAME: &'static str = "vosk";

    pub fn new(binary: Option<&Path>, model_dir: Option<&Path>) -> Self {
        let binary = match binary {
            Some(explicit) => which::which(explicit).ok(),
            None => which::which(DEFAULT_BINARY).ok(),
        };
        Self {
            binary,
            model_dir: model_dir.map(Path::to_path_buf),
        }
    }
}

impl SttBackend for Vosk {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn is_available(&self) -> bool {
        self.binary.is_some() && self.model_dir.as_deref().is_some_and(Path::is_dir)
    }

    fn accepts(&self, path: &Path) -> bool {
        audio::is_recognizer_ready(path)
    }

    fn transcribe(&self, path: &Path, options: &TranscribeOptions) -> SttResult<TranscriptResult> {
        let (Some(binary), Some(model_dir)) = (&self.binary, &self.model_dir) else {
            return Err(SttError::BackendUnavailable {
                tried: Self::NAME.to_string(),
            });
        };

        let workdir = tempfile::tempdir()
            .map_err(|e| SttError::transcription(Self::NAME, path, format!("temp dir: {e}")))?;
        let output = workdir.path().join("transcript.srt");

        let invocation = Invocation::new(binary, options.timeout)
            .arg("-i")
            .arg(path.as_os_str())
            .arg("-o")
            .arg(output.as_os_str())
            .arg("-t")
            .arg("srt")
            .arg("--model")
            .arg(model_dir.as_os_str());

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
            RunOutcome::Finished { .. } => {
                let srt = std::fs::read_to_string(&output).map_err(|e| {
                    SttError::transcription(Self::NAME, path, format!("no transcript written: {e}"))
                })?;
                let segments = segments::parse_srt(&srt);
                Ok(TranscriptResult {
                    text: segments::join_text(&segments),
                    backend_name: Self::NAME.to_string(),
                    confidence: None,
                    duration_seconds: None,
                    // The model fixes the language; report what was asked for.
                    language: options.language.clone(),
                    segments,
                })
            }
        }
    }
}
