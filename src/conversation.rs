//! Conversation-level assessment of a transcribed call.
//!
//! The linear score treats a transcript as one text. A phone call has more
//! structure: who spoke when, and which tactics showed up together. This
//! module derives that structure and applies composite rules on top of the
//! score without changing it:
//!
//! 1. Timed segments are split into turns at pauses longer than
//!    `gap_secs`, and turns alternate between two speakers.
//! 2. Per-tactic counts are read off the score's category matches.
//! 3. Composite rules lift the conversation risk (0-100):
//!    - three or more distinct pressure indicators: at least 70;
//!    - authority impersonation with a credential or account request: at
//!      least 90;
//!    - the first speaker dominating while asking for sensitive data: ×1.15;
//!    - any sensitive request below 50: raised to 70.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::scorer::{RiskLevel, ScoreResult};
use crate::stt::{Segment, TranscriptResult};

// ── Categories read as conversation features ───────────────────────────────

const URGENCY: &str = "PRESSURE_URGENCY";
const CREDENTIAL_OTP: &str = "CREDENTIAL_OTP";
const PAYMENT: &str = "PAYMENT_METHOD_RISK";
const AUTHORITY: &str = "AUTHORITY_IMPERSONATION";
const OFF_PLATFORM: &str = "OFF_PLATFORM";
const SECRECY: &str = "SECRECY";
const CREDENTIAL_HARVEST: &str = "CREDENTIAL_HARVESTING";
const ACTION_REQUEST: &str = "ACTION_REQUEST";
const FINANCIAL_ACCOUNT: &str = "FINANCIAL_ACCOUNT";
const KNOWN_SCRIPT: &str = "KNOWN_SCAM_SCRIPT";

const MAX_RISK: f64 = 100.0;
const INDICATOR_FLOOR: f64 = 70.0;
const AUTHORITY_FLOOR: f64 = 90.0;
const SENSITIVE_MINIMUM: f64 = 50.0;
const SENSITIVE_FLOOR: f64 = 70.0;
const MIN_INDICATORS: usize = 3;

// ── Policy ─────────────────────────────────────────────────────────────────

/// `[conversation]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationPolicy {
    /// Pause, in seconds, that ends a speaker's turn.
    pub gap_secs: f64,
    /// Share of speaking time above which the first speaker dominates.
    pub dominance_threshold: f64,
    /// Multiplier applied when a dominant speaker asks for sensitive data.
    pub dominance_boost: f64,
}

impl Default for ConversationPolicy {
    fn default() -> Self {
        Self {
            gap_secs: 0.8,
            dominance_threshold: 0.6,
            dominance_boost: 1.15,
        }
    }
}

impl ConversationPolicy {
    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |key: &str, value: f64, message: &str| ConfigError::InvalidValue {
            key: format!("conversation.{key}"),
            value: value.to_string(),
            message: message.to_string(),
        };
        if !self.gap_secs.is_finite() || self.gap_secs < 0.0 {
            return Err(invalid("gap_secs", self.gap_secs, "must be a non-negative number"));
        }
        if !(self.dominance_threshold > 0.0 && self.dominance_threshold <= 1.0) {
            return Err(invalid(
                "dominance_threshold",
                self.dominance_threshold,
                "must be in (0, 1]",
            ));
        }
        if !self.dominance_boost.is_finite() || self.dominance_boost < 1.0 {
            return Err(invalid(
                "dominance_boost",
                self.dominance_boost,
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ── Diarization ────────────────────────────────────────────────────────────

/// Turn-taking label. The first speaker is usually the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Speaker {
    #[serde(rename = "speaker_1")]
    One,
    #[serde(rename = "speaker_2")]
    Two,
}

impl Speaker {
    fn other(self) -> Self {
        match self {
            Self::One => Self::Two,
            Self::Two => Self::One,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiarizedSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: Speaker,
    pub text: String,
}

/// Assign two speakers by turn-taking.
///
/// Segments are ordered by time. A pause longer than `gap_secs` starts a new
/// turn and hands it to the other speaker. Turn-taking only; no acoustic
/// model is involved.
pub fn diarize(segments: &[Segment], gap_secs: f64) -> Vec<DiarizedSegment> {
    let mut ordered: Vec<&Segment> = segments.iter().collect();
    ordered.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.end.total_cmp(&b.end)));

    let mut speaker = Speaker::One;
    let mut previous_end: Option<f64> = None;
    ordered
        .into_iter()
        .map(|segment| {
            if previous_end.is_some_and(|end| segment.start - end > gap_secs) {
                speaker = speaker.other();
            }
            previous_end = Some(segment.end);
            DiarizedSegment {
                start: segment.start,
                end: segment.end,
                speaker,
                text: segment.text.clone(),
            }
        })
        .collect()
}

// ── Features ───────────────────────────────────────────────────────────────

/// Tactic counts and turn statistics for one conversation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationFeatures {
    pub urgency: u32,
    pub credential_otp: u32,
    pub payment: u32,
    pub authority: u32,
    pub off_platform: u32,
    pub secrecy: u32,
    pub credential_harvest: u32,
    pub action_request: u32,
    pub financial_account: u32,
    pub known_script: u32,
    /// First speaker's share of speaking time; `None` without timed segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_dominance: Option<f64>,
}

impl ConversationFeatures {
    pub fn extract(score: &ScoreResult, turns: &[DiarizedSegment]) -> Self {
        let count = |name: &str| score.category(name).map_or(0, |c| c.count);

        let mut first = 0.0;
        let mut total = 0.0;
        for turn in turns {
            let duration = (turn.end - turn.start).max(0.0);
            total += duration;
            if turn.speaker == Speaker::One {
                first += duration;
            }
        }

        Self {
            urgency: count(URGENCY),
            credential_otp: count(CREDENTIAL_OTP),
            payment: count(PAYMENT),
            authority: count(AUTHORITY),
            off_platform: count(OFF_PLATFORM),
            secrecy: count(SECRECY),
            credential_harvest: count(CREDENTIAL_HARVEST),
            action_request: count(ACTION_REQUEST),
            financial_account: count(FINANCIAL_ACCOUNT),
            known_script: count(KNOWN_SCRIPT),
            caller_dominance: (total > 0.0).then(|| first / total),
        }
    }

    /// Distinct pressure tactics present.
    pub fn medium_indicators(&self) -> usize {
        [
            self.urgency,
            self.payment,
            self.off_platform,
            self.secrecy,
            self.authority,
            self.known_script,
        ]
        .iter()
        .filter(|&&n| n > 0)
        .count()
    }

    /// Codes, credentials or account details were asked for.
    pub fn sensitive_request(&self) -> bool {
        self.credential_otp > 0 || self.credential_harvest > 0 || self.financial_account > 0
    }
}

// ── Composite rules ────────────────────────────────────────────────────────

/// A composite rule that fired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "rule")]
pub enum CompositeRule {
    MultipleIndicators { indicators: usize },
    AuthorityWithSensitiveRequest,
    CallerDominance { ratio: f64 },
    SensitiveRequestFloor,
}

impl CompositeRule {
    pub fn id(&self) -> &'static str {
        match self {
            Self::MultipleIndicators { .. } => "multiple_indicators",
            Self::AuthorityWithSensitiveRequest => "authority_with_sensitive_request",
            Self::CallerDominance { .. } => "caller_dominance",
            Self::SensitiveRequestFloor => "sensitive_request_floor",
        }
    }
}

/// Conversation risk for one transcribed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationAssessment {
    /// 0-100, after composite rules.
    pub risk_score: f64,
    pub level: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<CompositeRule>,
    /// Sorted `category:*` and `rule:*` tags.
    pub flags: Vec<String>,
    pub summary: String,
    pub features: ConversationFeatures,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub turns: Vec<DiarizedSegment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub speaker_text: BTreeMap<Speaker, String>,
}

/// Diarize `transcript`, extract features and apply the composite rules to
/// `score`. `score` itself is left as is.
pub fn assess(
    transcript: &TranscriptResult,
    score: &ScoreResult,
    policy: &ConversationPolicy,
) -> ConversationAssessment {
    let turns = diarize(&transcript.segments, policy.gap_secs);
    let features = ConversationFeatures::extract(score, &turns);

    let mut risk = score.raw_score.clamp(0.0, MAX_RISK);
    let mut rules = Vec::new();

    let indicators = features.medium_indicators();
    if indicators >= MIN_INDICATORS {
        risk = risk.max(INDICATOR_FLOOR);
        rules.push(CompositeRule::MultipleIndicators { indicators });
    }

    let sensitive = features.sensitive_request();
    if features.authority > 0 && sensitive {
        risk = risk.max(AUTHORITY_FLOOR);
        rules.push(CompositeRule::AuthorityWithSensitiveRequest);
    }

    if let Some(ratio) = features.caller_dominance {
        // Amplifies existing risk; never creates it.
        if ratio >= policy.dominance_threshold && sensitive && risk > 0.0 {
            risk = (risk * policy.dominance_boost).min(MAX_RISK);
            rules.push(CompositeRule::CallerDominance { ratio });
        }
    }

    if sensitive && risk < SENSITIVE_MINIMUM {
        risk = SENSITIVE_FLOOR;
        rules.push(CompositeRule::SensitiveRequestFloor);
    }

    let risk_score = risk.round();
    let level = RiskLevel::from_score(risk_score);

    let flags: BTreeSet<String> = score
        .matched_categories
        .iter()
        .map(|c| format!("category:{}", c.category.to_ascii_lowercase()))
        .chain(rules.iter().map(|r| format!("rule:{}", r.id())))
        .collect();

    let mut speaker_text: BTreeMap<Speaker, String> = BTreeMap::new();
    for turn in &turns {
        let text = turn.text.trim();
        if text.is_empty() {
            continue;
        }
        let entry = speaker_text.entry(turn.speaker).or_default();
        if !entry.is_empty() {
            entry.push(' ');
        }
        entry.push_str(text);
    }

    if !rules.is_empty() {
        tracing::debug!(
            raw = score.raw_score,
            risk = risk_score,
            rules = ?rules.iter().map(CompositeRule::id).collect::<Vec<_>>(),
            "composite rules applied"
        );
    }

    ConversationAssessment {
        risk_score,
        level,
        summary: summarize(&features, risk_score, level, policy),
        rules,
        flags: flags.into_iter().collect(),
        features,
        turns,
        speaker_text,
    }
}

fn summarize(
    features: &ConversationFeatures,
    risk: f64,
    level: RiskLevel,
    policy: &ConversationPolicy,
) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if features.credential_otp > 0 || features.credential_harvest > 0 {
        parts.push("Caller asked for codes, card or account credentials.");
    }
    if features.payment > 0 {
        parts.push("High-risk payment language detected.");
    }
    if features.authority > 0 {
        parts.push("Caller appears to impersonate a bank, agency or fraud department.");
    }
    if features.urgency > 0 {
        parts.push("Urgency or pressure tactics detected.");
    }
    if features.known_script > 0 {
        parts.push("Transcript matches a known scam script.");
    }
    if features
        .caller_dominance
        .is_some_and(|r| r >= policy.dominance_threshold)
        && (features.credential_otp > 0 || features.credential_harvest > 0)
    {
        parts.push("One speaker dominates the call while asking for sensitive information.");
    }
    if parts.is_empty() {
        parts.push("No strong scam indicators in the transcript.");
    }
    format!("{} Conversation risk: {level} ({risk:.0}/100).", parts.join(" "))
}
