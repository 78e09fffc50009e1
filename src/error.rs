//! Rich diagnostic error types for scam-shield.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text. Configuration errors are fatal at
//! startup; STT and pipeline errors are reported per file and never abort a scan.

use std::path::Path;

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for scam-shield.
#[derive(Debug, Error, Diagnostic)]
pub enum ShieldError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Stt(#[from] SttError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Result type for top-level operations.
pub type ShieldResult<T> = std::result::Result<T, ShieldError>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("category \"{category}\" has negative weight {weight}")]
    #[diagnostic(
        code(shield::config::negative_weight),
        help("Phrase bank weights must be zero or positive. Use 0 to disable a category.")
    )]
    NegativeWeight { category: String, weight: f64 },

    #[error("category \"{category}\" has a non-finite weight")]
    #[diagnostic(
        code(shield::config::non_finite_weight),
        help("Weights must be ordinary numbers; NaN and infinity are rejected.")
    )]
    NonFiniteWeight { category: String },

    #[error("duplicate phrase bank category \"{name}\"")]
    #[diagnostic(
        code(shield::config::duplicate_category),
        help("Each category may be defined once. Merge the phrase lists into a single table.")
    )]
    DuplicateCategory { name: String },

    #[error("phrase bank category \"{name}\" has no patterns")]
    #[diagnostic(
        code(shield::config::empty_category),
        help("Give the category at least one entry in `phrases` or `regexes`.")
    )]
    EmptyCategory { name: String },

    #[error("invalid pattern {pattern:?} in category \"{category}\": {message}")]
    #[diagnostic(
        code(shield::config::invalid_pattern),
        help("Regexes use Rust `regex` syntax. Phrases must contain at least one word or digit.")
    )]
    InvalidPattern {
        category: String,
        pattern: String,
        message: String,
    },

    #[error("invalid value for {key}: {value:?} ({message})")]
    #[diagnostic(
        code(shield::config::invalid_value),
        help("Check the configuration file and the SCAM_SHIELD_* environment variables.")
    )]
    InvalidValue {
        key: String,
        value: String,
        message: String,
    },

    #[error("failed to read {path}")]
    #[diagnostic(
        code(shield::config::read),
        help("Ensure the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    #[diagnostic(
        code(shield::config::parse),
        help("Check the TOML syntax. Weights must be numbers, not strings.")
    )]
    Parse { path: String, message: String },
}

/// Result type for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// STT errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SttError {
    #[error("no speech-to-text backend available (tried: {tried})")]
    #[diagnostic(
        code(shield::stt::backend_unavailable),
        help(
            "Install whisper.cpp (`whisper-cli`) and set SCAM_SHIELD_WHISPER_MODEL to a local \
             ggml model, or install `vosk-transcriber` and set SCAM_SHIELD_VOSK_MODEL. \
             Text scoring works without a backend."
        )
    )]
    BackendUnavailable { tried: String },

    #[error("unknown speech-to-text backend \"{name}\" (known: {known})")]
    #[diagnostic(
        code(shield::stt::unknown_backend),
        help("Pick one of the known backend names or unset SCAM_SHIELD_STT_BACKEND.")
    )]
    UnknownBackend { name: String, known: String },

    #[error("{format} input {path} needs an external decoder ({decoder}) that is not installed")]
    #[diagnostic(
        code(shield::stt::decoder_missing),
        help("Install ffmpeg and make sure it is on PATH, or convert the file to 16 kHz mono WAV.")
    )]
    DecoderMissing {
        path: String,
        format: String,
        decoder: String,
    },

    #[error("unsupported audio format: {path}")]
    #[diagnostic(
        code(shield::stt::unsupported_format),
        help("Supported extensions are wav, flac, mp3, ogg and m4a.")
    )]
    UnsupportedFormat { path: String },

    #[error("{backend} failed on {path}: {message}")]
    #[diagnostic(
        code(shield::stt::transcription),
        help("The audio may be corrupt or in a codec the backend cannot read.")
    )]
    Transcription {
        backend: String,
        path: String,
        message: String,
    },

    #[error("{backend} timed out after {secs}s on {path}")]
    #[diagnostic(
        code(shield::stt::timeout),
        help("Raise SCAM_SHIELD_TRANSCRIBE_TIMEOUT_SECS or use a smaller model.")
    )]
    Timeout {
        backend: String,
        path: String,
        secs: u64,
    },

    #[error("input {path} is busy: {source}")]
    #[diagnostic(
        code(shield::stt::input_busy),
        help("The file is locked or still being copied. It will be retried on the next scan.")
    )]
    InputBusy {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SttError {
    /// Whether a retry on a later scan may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::InputBusy { .. })
    }

    pub(crate) fn transcription(backend: &str, path: &Path, message: impl Into<String>) -> Self {
        Self::Transcription {
            backend: backend.to_string(),
            path: path.display().to_string(),
            message: message.into(),
        }
    }
}

/// Result type for STT operations.
pub type SttResult<T> = std::result::Result<T, SttError>;

// ---------------------------------------------------------------------------
// Pipeline errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("I/O error on {path}")]
    #[diagnostic(
        code(shield::pipeline::io),
        help("Check that the inbox and outbox directories exist and are writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is still being written: {message}")]
    #[diagnostic(
        code(shield::pipeline::transient_file),
        help("The file will be retried on the next scan.")
    )]
    TransientFile { path: String, message: String },

    #[error("failed to serialize result record: {message}")]
    #[diagnostic(code(shield::pipeline::serialize))]
    Serialize { message: String },
}

impl PipelineError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Kind of the underlying I/O error, for `Io` errors.
    pub fn io_kind(&self) -> Option<std::io::ErrorKind> {
        match self {
            Self::Io { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

/// Result type for pipeline operations.
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
