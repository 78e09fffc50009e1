//! The Shield: process-wide scoring context.
//!
//! Owns the phrase bank (through the scorer), the per-source timelines and
//! the STT gateway. Built once at startup and passed by reference; there are
//! no globals.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::ShieldConfig;
use crate::conversation::{self, ConversationAssessment, ConversationPolicy};
use crate::error::{ShieldResult, SttResult};
use crate::phrase_bank::PhraseBank;
use crate::record::ResultRecord;
use crate::scorer::{ScoreResult, Scorer};
use crate::stt::{SttGateway, TranscriptResult};
use crate::timeline::{self, EscalationPolicy, EscalationVerdict, TimelineEvent, TimelineTracker};

/// Transcript, score, verdict and conversation risk for one audio input.
///
/// Produced by [`Shield::evaluate_audio`]. The source's timeline is not
/// touched until the assessment is passed to [`Shield::commit_audio`].
#[derive(Debug, Clone)]
pub struct AudioAssessment {
    pub transcript: TranscriptResult,
    pub score: ScoreResult,
    pub verdict: EscalationVerdict,
    pub conversation: ConversationAssessment,
    source_id: String,
    observed_at: Instant,
}

impl AudioAssessment {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
}

pub struct Shield {
    scorer: Scorer,
    tracker: TimelineTracker,
    stt: SttGateway,
    conversation: ConversationPolicy,
}

impl std::fmt::Debug for Shield {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shield")
            .field("patterns", &self.scorer.bank().len())
            .field("sources", &self.tracker.source_count())
            .field("stt", &self.stt)
            .field("conversation", &self.conversation)
            .finish()
    }
}

impl Shield {
    /// Validate `config`, load the phrase bank and detect STT backends.
    pub fn from_config(config: &ShieldConfig) -> ShieldResult<Self> {
        config.validate()?;
        let bank = match &config.phrase_bank {
            Some(path) => PhraseBank::load(path)?,
            None => PhraseBank::builtin()?,
        };
        tracing::info!(
            categories = bank.categories().len(),
            patterns = bank.len(),
            custom = config.phrase_bank.is_some(),
            "shield ready"
        );
        let stt = SttGateway::from_config(&config.stt);
        if !stt.has_available_backend() {
            tracing::debug!("no speech-to-text backend available; audio input will fail");
        }
        Ok(Self::new(bank, config.escalation.clone(), stt)
            .with_conversation_policy(config.conversation.clone()))
    }

    pub fn new(bank: PhraseBank, policy: EscalationPolicy, stt: SttGateway) -> Self {
        Self {
            scorer: Scorer::new(Arc::new(bank)),
            tracker: TimelineTracker::new(policy),
            stt,
            conversation: ConversationPolicy::default(),
        }
    }

    pub fn with_conversation_policy(mut self, policy: ConversationPolicy) -> Self {
        self.conversation = policy;
        self
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn tracker(&self) -> &TimelineTracker {
        &self.tracker
    }

    pub fn stt(&self) -> &SttGateway {
        &self.stt
    }

    /// Stateless score of one text. Never touches the timelines.
    pub fn score_text(&self, text: &str) -> ScoreResult {
        self.scorer.score(text)
    }

    /// Score `text`, fold it into the source's timeline and build a record.
    pub fn assess(&mut self, text: &str, source: Option<&str>) -> ResultRecord {
        let source_id = timeline::source_or_default(source).to_string();
        let score = self.scorer.score(text);
        let verdict = self
            .tracker
            .observe(&source_id, &score, text.chars().count(), Instant::now());
        ResultRecord::for_text(text, &source_id, score, verdict)
    }

    /// Transcribe and score one audio file against `source_id`'s history
    /// without recording it.
    pub fn evaluate_audio(
        &self,
        path: &Path,
        source_id: &str,
        backend: Option<&str>,
    ) -> SttResult<AudioAssessment> {
        let transcript = self.stt.transcribe(path, backend)?;
        let score = self.scorer.score(&transcript.text);
        let verdict = self.tracker.evaluate(source_id, &score);
        let conversation = conversation::assess(&transcript, &score, &self.conversation);
        Ok(AudioAssessment {
            transcript,
            score,
            verdict,
            conversation,
            source_id: source_id.to_string(),
            observed_at: Instant::now(),
        })
    }

    /// Append an evaluated file to its source's timeline.
    pub fn commit_audio(&mut self, assessment: &AudioAssessment) {
        if assessment.verdict.escalated {
            tracing::info!(
                source = %assessment.source_id,
                adjusted = assessment.verdict.adjusted_score,
                reason = ?assessment.verdict.reason,
                "source escalated"
            );
        }
        self.tracker.record(
            &assessment.source_id,
            TimelineEvent {
                timestamp: assessment.observed_at,
                source_id: assessment.source_id.clone(),
                score: assessment.score.clone(),
                text_length: assessment.transcript.text.chars().count(),
            },
        );
    }

    /// Transcribe, score and track one audio file.
    ///
    /// Transcription failures are returned as-is; the timeline is only
    /// updated when a transcript was produced.
    pub fn analyze_audio(
        &mut self,
        path: &Path,
        source_id: &str,
        backend: Option<&str>,
    ) -> SttResult<AudioAssessment> {
        let assessment = self.evaluate_audio(path, source_id, backend)?;
        self.commit_audio(&assessment);
        Ok(assessment)
    }
}
