//! Result records: the unit of output for text and audio inputs.
//!
//! A record carries either a score and escalation verdict, or an error. A
//! failed input never shows up as a silent zero score.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::ConversationAssessment;
use crate::error::{PipelineError, SttError};
use crate::scorer::ScoreResult;
use crate::shield::AudioAssessment;
use crate::stt::TranscriptResult;
use crate::timeline::EscalationVerdict;

/// What was scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum RecordSource {
    File {
        path: String,
        file_name: String,
        /// SHA-256 of the content, hex.
        fingerprint: String,
    },
    Text {
        input: String,
    },
}

/// Failure category stored in a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    BackendUnavailable,
    UnknownBackend,
    DecoderMissing,
    UnsupportedFormat,
    Transcription,
    Timeout,
    TransientFile,
    Io,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BackendUnavailable => "backend_unavailable",
            Self::UnknownBackend => "unknown_backend",
            Self::DecoderMissing => "decoder_missing",
            Self::UnsupportedFormat => "unsupported_format",
            Self::Transcription => "transcription",
            Self::Timeout => "timeout",
            Self::TransientFile => "transient_file",
            Self::Io => "io",
        }
    }
}

impl From<&SttError> for ErrorKind {
    fn from(err: &SttError) -> Self {
        match err {
            SttError::BackendUnavailable { .. } => Self::BackendUnavailable,
            SttError::UnknownBackend { .. } => Self::UnknownBackend,
            SttError::DecoderMissing { .. } => Self::DecoderMissing,
            SttError::UnsupportedFormat { .. } => Self::UnsupportedFormat,
            SttError::Transcription { .. } => Self::Transcription,
            SttError::Timeout { .. } => Self::Timeout,
            SttError::InputBusy { .. } => Self::TransientFile,
        }
    }
}

impl From<&PipelineError> for ErrorKind {
    fn from(err: &PipelineError) -> Self {
        match err {
            PipelineError::Io { .. } | PipelineError::Serialize { .. } => Self::Io,
            PipelineError::TransientFile { .. } => Self::TransientFile,
        }
    }
}

/// Error attached to a record in place of a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordError {
    pub kind: ErrorKind,
    pub message: String,
    /// Processing attempts made, including retries of transient failures.
    pub attempts: u32,
}

impl RecordError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts,
        }
    }

    pub fn from_stt(err: &SttError, attempts: u32) -> Self {
        Self::new(ErrorKind::from(err), err.to_string(), attempts)
    }
}

/// One scored input, or the reason it could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub source: RecordSource,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<TranscriptResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<ScoreResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<EscalationVerdict>,
    /// Speaker turns and composite rules, for transcribed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<ConversationAssessment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
    pub timestamp: DateTime<Utc>,
}

impl ResultRecord {
    pub fn for_text(
        input: &str,
        source_id: &str,
        score: ScoreResult,
        verdict: EscalationVerdict,
    ) -> Self {
        Self {
            source: RecordSource::Text {
                input: input.to_string(),
            },
            source_id: source_id.to_string(),
            transcript: None,
            score: Some(score),
            verdict: Some(verdict),
            conversation: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn for_audio(path: &Path, fingerprint: &str, assessment: &AudioAssessment) -> Self {
        Self {
            source: file_source(path, fingerprint),
            source_id: assessment.source_id().to_string(),
            transcript: Some(assessment.transcript.clone()),
            score: Some(assessment.score.clone()),
            verdict: Some(assessment.verdict.clone()),
            conversation: Some(assessment.conversation.clone()),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed_file(path: &Path, fingerprint: &str, source_id: &str, error: RecordError) -> Self {
        Self {
            source: file_source(path, fingerprint),
            source_id: source_id.to_string(),
            transcript: None,
            score: None,
            verdict: None,
            conversation: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Content fingerprint, for file records.
    pub fn fingerprint(&self) -> Option<&str> {
        match &self.source {
            RecordSource::File { fingerprint, .. } => Some(fingerprint),
            RecordSource::Text { .. } => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Multi-line report for terminals.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let label = match &self.source {
            RecordSource::File { file_name, .. } => file_name.clone(),
            RecordSource::Text { input } => excerpt(input, 60),
        };
        let _ = writeln!(out, "input:      {label}");
        let _ = writeln!(out, "source:     {}", self.source_id);

        if let Some(transcript) = &self.transcript {
            let _ = writeln!(
                out,
                "transcript: {:?} (via {})",
                excerpt(&transcript.text, 200),
                transcript.backend_name
            );
        }

        if let Some(error) = &self.error {
            let _ = writeln!(
                out,
                "error:      [{}] {} (attempts: {})",
                error.kind.as_str(),
                error.message,
                error.attempts
            );
        }

        if let Some(score) = &self.score {
            let _ = writeln!(out, "score:      {:.1} ({})", score.raw_score, score.level());
            for m in &score.matched_categories {
                let _ = writeln!(
                    out,
                    "  {:<26} {:>6.1}  x{:<3} {}",
                    m.category,
                    m.contribution,
                    m.count,
                    m.matched.join(", ")
                );
            }
        }

        if let Some(conversation) = &self.conversation {
            let rules = conversation
                .rules
                .iter()
                .map(|r| r.id())
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "call:       {:.0}/100 ({}), {} turns{}",
                conversation.risk_score,
                conversation.level,
                conversation.turns.len(),
                if rules.is_empty() {
                    String::new()
                } else {
                    format!(", rules: {rules}")
                }
            );
            let _ = writeln!(out, "            {}", conversation.summary);
        }

        if let Some(verdict) = &self.verdict {
            let status = match &verdict.reason {
                Some(reason) => format!("ESCALATED ({reason})"),
                None => "not escalated".to_string(),
            };
            let _ = writeln!(
                out,
                "escalation: {status}, adjusted {:.1} ({}), {} high-risk, {} prior",
                verdict.adjusted_score, verdict.level, verdict.high_risk_events, verdict.history_len
            );
        }
        out
    }
}

fn file_source(path: &Path, fingerprint: &str) -> RecordSource {
    RecordSource::File {
        path: path.display().to_string(),
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        fingerprint: fingerprint.to_string(),
    }
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{cut}…")
}
