//! Offline speech-to-text gateway.
//!
//! Backends are black-box recognizers behind the [`SttBackend`] trait. The
//! [`SttGateway`] checks them once at startup and picks one per call:
//!
//! 1. the backend named by the caller,
//! 2. else the configured default (`SCAM_SHIELD_STT_BACKEND`),
//! 3. else every available backend in fallback order until one succeeds.
//!
//! Inputs a backend cannot read directly are converted to 16 kHz mono WAV
//! with `ffmpeg` first.

pub mod audio;
pub mod process;
pub mod segments;
pub mod vosk;
pub mod whisper;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult, SttError, SttResult};

use self::audio::{AudioFormat, PreparedAudio};
pub use self::segments::Segment;
use self::vosk::Vosk;
use self::whisper::WhisperCpp;

/// Names of the built-in backends, in fallback order.
pub const FALLBACK_ORDER: &[&str] = &[WhisperCpp::NAME, Vosk::NAME];

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Uniform transcription output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub text: String,
    pub backend_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Timed segments, when the backend reports them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<Segment>,
}

/// Per-call knobs passed to a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscribeOptions {
    /// Forced language code; `None` lets the backend decide.
    pub language: Option<String>,
    pub timeout: Duration,
}

impl Default for TranscribeOptions {
    fn default() -> Self {
        Self {
            language: None,
            timeout: Duration::from_secs(default_timeout_secs()),
        }
    }
}

/// A speech-to-text engine.
pub trait SttBackend: Send + Sync {
    /// Stable lowercase name used for selection.
    fn name(&self) -> &'static str;

    /// Whether the engine and its model are installed.
    fn is_available(&self) -> bool;

    /// Whether `path` can be fed to the engine as-is.
    fn accepts(&self, path: &Path) -> bool;

    fn transcribe(&self, path: &Path, options: &TranscribeOptions) -> SttResult<TranscriptResult>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// `[stt]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SttConfig {
    /// Default backend name.
    #[serde(default)]
    pub backend: Option<String>,
    /// Forced language code, e.g. `en`.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub whisper_bin: Option<PathBuf>,
    /// Path to a ggml model file.
    #[serde(default)]
    pub whisper_model: Option<PathBuf>,
    #[serde(default)]
    pub vosk_bin: Option<PathBuf>,
    /// Path to an unpacked Vosk model directory.
    #[serde(default)]
    pub vosk_model: Option<PathBuf>,
    #[serde(default)]
    pub ffmpeg_bin: Option<PathBuf>,
    /// Per-file limit for decoding plus recognition, shared by every child
    /// process one transcription starts (ffmpeg and each fallback backend).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: None,
            language: None,
            whisper_bin: None,
            whisper_model: None,
            vosk_bin: None,
            vosk_model: None,
            ffmpeg_bin: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl SttConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "stt.timeout_secs".into(),
                value: "0".into(),
                message: "must be at least 1".into(),
            });
        }
        if let Some(name) = &self.backend {
            if !FALLBACK_ORDER.contains(&name.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: "stt.backend".into(),
                    value: name.clone(),
                    message: format!("known backends: {}", FALLBACK_ORDER.join(", ")),
                });
            }
        }
        Ok(())
    }

    pub fn options(&self) -> TranscribeOptions {
        TranscribeOptions {
            language: self.language.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Availability snapshot for one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendStatus {
    pub name: &'static str,
    pub available: bool,
}

struct Registered {
    backend: Box<dyn SttBackend>,
    available: bool,
}

/// Backend selection and format preparation in front of the engines.
pub struct SttGateway {
    backends: Vec<Registered>,
    default_backend: Option<String>,
    ffmpeg: Option<PathBuf>,
    options: TranscribeOptions,
}

impl std::fmt::Debug for SttGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SttGateway")
            .field("backends", &self.statuses())
            .field("default_backend", &self.default_backend)
            .field("ffmpeg", &self.ffmpeg)
            .finish()
    }
}

impl SttGateway {
    /// Build the built-in backends from configuration and check which are installed.
    pub fn from_config(config: &SttConfig) -> Self {
        let backends: Vec<Box<dyn SttBackend>> = vec![
            Box::new(WhisperCpp::new(
                config.whisper_bin.as_deref(),
                config.whisper_model.as_deref(),
            )),
            Box::new(Vosk::new(
                config.vosk_bin.as_deref(),
                config.vosk_model.as_deref(),
            )),
        ];
        let ffmpeg = match &config.ffmpeg_bin {
            Some(explicit) => which::which(explicit).ok(),
            None => which::which("ffmpeg").ok(),
        };
        Self::with_backends(backends, config.options())
            .with_default_backend(config.backend.clone())
            .with_decoder(ffmpeg)
    }

    /// Gateway over an explicit backend list, in fallback order.
    pub fn with_backends(backends: Vec<Box<dyn SttBackend>>, options: TranscribeOptions) -> Self {
        let backends = backends
            .into_iter()
            .map(|backend| {
                let available = backend.is_available();
                tracing::debug!(backend = backend.name(), available, "checked stt backend");
                Registered { backend, available }
            })
            .collect();
        Self {
            backends,
            default_backend: None,
            ffmpeg: None,
            options,
        }
    }

    pub fn with_default_backend(mut self, name: Option<String>) -> Self {
        self.default_backend = name;
        self
    }

    pub fn with_decoder(mut self, ffmpeg: Option<PathBuf>) -> Self {
        self.ffmpeg = ffmpeg;
        self
    }

    pub fn statuses(&self) -> Vec<BackendStatus> {
        self.backends
            .iter()
            .map(|r| BackendStatus {
                name: r.backend.name(),
                available: r.available,
            })
            .collect()
    }

    pub fn has_available_backend(&self) -> bool {
        self.backends.iter().any(|r| r.available)
    }

    pub fn decoder(&self) -> Option<&Path> {
        self.ffmpeg.as_deref()
    }

    fn known_names(&self) -> String {
        self.backends
            .iter()
            .map(|r| r.backend.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Backends to try for one call, in order.
    fn candidates(&self, backend_name: Option<&str>) -> SttResult<Vec<&Registered>> {
        let requested = backend_name
            .map(str::to_string)
            .or_else(|| self.default_backend.clone());

        if let Some(name) = requested {
            let name = name.trim().to_ascii_lowercase();
            let Some(found) = self.backends.iter().find(|r| r.backend.name() == name) else {
                return Err(SttError::UnknownBackend {
                    name,
                    known: self.known_names(),
                });
            };
            if !found.available {
                return Err(SttError::BackendUnavailable { tried: name });
            }
            return Ok(vec![found]);
        }

        let available: Vec<&Registered> = self.backends.iter().filter(|r| r.available).collect();
        if available.is_empty() {
            return Err(SttError::BackendUnavailable {
                tried: self.known_names(),
            });
        }
        Ok(available)
    }

    /// Options for the next child process: the configured ones with the
    /// time left until `deadline`.
    fn budget(&self, deadline: Instant, stage: &str, path: &Path) -> SttResult<TranscribeOptions> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(SttError::Timeout {
                backend: stage.to_string(),
                path: path.display().to_string(),
                secs: self.options.timeout.as_secs(),
            });
        }
        Ok(TranscribeOptions {
            timeout: remaining,
            ..self.options.clone()
        })
    }

    /// Transcribe one audio file.
    ///
    /// The configured timeout bounds the whole call: conversion and every
    /// backend attempt draw from the same budget.
    pub fn transcribe(&self, path: &Path, backend_name: Option<&str>) -> SttResult<TranscriptResult> {
        let Some(format) = AudioFormat::from_path(path) else {
            return Err(SttError::UnsupportedFormat {
                path: path.display().to_string(),
            });
        };
        let candidates = self.candidates(backend_name)?;
        audio::check_readable(path)?;
        let deadline = Instant::now() + self.options.timeout;

        let mut converted: Option<PreparedAudio> = None;
        let mut last_error = None;

        for registered in candidates {
            let backend = registered.backend.as_ref();
            let input = if backend.accepts(path) {
                path.to_path_buf()
            } else {
                // Converted once and shared by every later candidate.
                let prepared = match converted.take() {
                    Some(prepared) => prepared,
                    None => {
                        let budget = self.budget(deadline, "ffmpeg", path)?;
                        audio::convert(path, format, self.decoder(), budget.timeout)?
                    }
                };
                let input = prepared.path().to_path_buf();
                converted = Some(prepared);
                input
            };

            let options = self.budget(deadline, backend.name(), path)?;
            match backend.transcribe(&input, &options) {
                Ok(mut result) => {
                    if result.duration_seconds.is_none() {
                        result.duration_seconds =
                            audio::inspect_wav(&input).map(|info| info.duration_seconds);
                    }
                    tracing::info!(
                        backend = backend.name(),
                        file = %path.display(),
                        chars = result.text.len(),
                        "transcribed"
                    );
                    return Ok(result);
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), file = %path.display(), error = %e, "backend failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| SttError::BackendUnavailable {
            tried: self.known_names(),
        }))
    }
}
