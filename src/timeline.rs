//! Per-source behavioral timelines and escalation verdicts.
//!
//! Every source (caller, session, chat) gets a bounded FIFO of its most
//! recent scored events. `evaluate` folds that history into an adjusted score
//! and decides whether the source is escalating:
//!
//! - **Sustained risk**: at least `min_high_risk_events` scores above
//!   `high_risk_threshold` inside the window.
//! - **Hard ceiling**: the latest score alone is above `hard_ceiling`.
//!
//! The window is `max_events` results long: the latest result plus up to
//! `max_events - 1` of the most recent stored events. The adjusted score is
//! `latest + Σ prior_k × decay^k` over that window, with `prior_1` the most
//! recent stored event. Timelines idle for longer than `idle_secs` are
//! dropped during the sweep that runs on every `record`.
//!
//! All state is in memory and lost when the process exits.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::scorer::{RiskLevel, ScoreResult};

/// Source id used when the caller does not track sources.
pub const DEFAULT_SOURCE: &str = "default";

/// Resolve an optional, possibly blank source id.
pub fn source_or_default(source: Option<&str>) -> &str {
    match source.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => DEFAULT_SOURCE,
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Escalation thresholds and retention bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationPolicy {
    /// Results per escalation window, the latest included. Also the FIFO
    /// bound on stored events per source.
    pub max_events: usize,
    /// Seconds without events after which a source's timeline is dropped.
    pub idle_secs: u64,
    /// Scores strictly above this count as high-risk.
    pub high_risk_threshold: f64,
    /// A latest score strictly above this escalates on its own.
    pub hard_ceiling: f64,
    /// High-risk events in the window needed to escalate.
    pub min_high_risk_events: usize,
    /// Weight multiplier per step back in history, in `[0, 1)`.
    pub decay: f64,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            max_events: 20,
            idle_secs: 30 * 60,
            high_risk_threshold: 50.0,
            hard_ceiling: 90.0,
            min_high_risk_events: 2,
            decay: 0.5,
        }
    }
}

impl EscalationPolicy {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let invalid = |key: &str, value: String, message: &str| ConfigError::InvalidValue {
            key: format!("escalation.{key}"),
            value,
            message: message.to_string(),
        };
        if self.max_events == 0 {
            return Err(invalid("max_events", "0".into(), "must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.decay) {
            return Err(invalid(
                "decay",
                self.decay.to_string(),
                "must be in [0, 1)",
            ));
        }
        for (key, value) in [
            ("high_risk_threshold", self.high_risk_threshold),
            ("hard_ceiling", self.hard_ceiling),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(key, value.to_string(), "must be a non-negative number"));
            }
        }
        if self.min_high_risk_events == 0 {
            return Err(invalid(
                "min_high_risk_events",
                "0".into(),
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Events and timelines
// ---------------------------------------------------------------------------

/// One scored interaction from a source.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    pub timestamp: Instant,
    pub source_id: String,
    pub score: ScoreResult,
    pub text_length: usize,
}

/// Bounded history for one source, oldest first.
#[derive(Debug, Clone)]
pub struct Timeline {
    events: VecDeque<TimelineEvent>,
    last_seen: Instant,
}

impl Timeline {
    fn new(now: Instant, capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            last_seen: now,
        }
    }

    pub fn events(&self) -> impl DoubleEndedIterator<Item = &TimelineEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }
}

// ---------------------------------------------------------------------------
// Verdict
// ---------------------------------------------------------------------------

/// Why a source was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EscalationReason {
    /// The latest score alone crossed the hard ceiling.
    HardCeiling,
    /// Enough high-risk events accumulated in the window.
    SustainedHighRisk { events: usize },
}

impl std::fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardCeiling => write!(f, "latest score above hard ceiling"),
            Self::SustainedHighRisk { events } => {
                write!(f, "{events} high-risk events in window")
            }
        }
    }
}

/// Latest score combined with the source's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationVerdict {
    pub adjusted_score: f64,
    pub escalated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<EscalationReason>,
    /// High-risk events in the window, latest included.
    pub high_risk_events: usize,
    /// Prior events in the window.
    pub history_len: usize,
    pub level: RiskLevel,
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// In-memory store of timelines keyed by source id.
#[derive(Debug, Clone, Default)]
pub struct TimelineTracker {
    policy: EscalationPolicy,
    timelines: HashMap<String, Timeline>,
}

impl TimelineTracker {
    pub fn new(policy: EscalationPolicy) -> Self {
        Self {
            policy,
            timelines: HashMap::new(),
        }
    }

    pub fn policy(&self) -> &EscalationPolicy {
        &self.policy
    }

    pub fn timeline(&self, source_id: &str) -> Option<&Timeline> {
        self.timelines.get(source_id)
    }

    pub fn source_count(&self) -> usize {
        self.timelines.len()
    }

    /// Append `event` to `source_id`'s timeline, evicting the oldest events
    /// beyond `max_events`, then sweep idle sources.
    pub fn record(&mut self, source_id: &str, event: TimelineEvent) {
        let now = event.timestamp;
        let capacity = self.policy.max_events;
        let timeline = self
            .timelines
            .entry(source_id.to_string())
            .or_insert_with(|| Timeline::new(now, capacity));

        timeline.events.push_back(event);
        while timeline.events.len() > capacity {
            timeline.events.pop_front();
        }
        if now > timeline.last_seen {
            timeline.last_seen = now;
        }

        self.sweep_idle(now);
    }

    /// Drop timelines with no events for longer than the idle timeout.
    /// Returns how many were removed.
    pub fn sweep_idle(&mut self, now: Instant) -> usize {
        let idle = self.policy.idle_timeout();
        let before = self.timelines.len();
        self.timelines
            .retain(|_, t| now.saturating_duration_since(t.last_seen) <= idle);
        let removed = before - self.timelines.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = self.timelines.len(), "swept idle timelines");
        }
        removed
    }

    /// Combine `latest` with the stored history of `source_id`.
    ///
    /// `latest` is not stored; call [`record`](Self::record) (or use
    /// [`observe`](Self::observe)) to append it.
    pub fn evaluate(&self, source_id: &str, latest: &ScoreResult) -> EscalationVerdict {
        let policy = &self.policy;
        let prior: Vec<f64> = self
            .timelines
            .get(source_id)
            .map(|t| {
                t.events()
                    .rev()
                    .take(policy.max_events.saturating_sub(1))
                    .map(|e| e.score.raw_score)
                    .collect()
            })
            .unwrap_or_default();

        let mut weight = 1.0;
        let mut carried = 0.0;
        for score in &prior {
            weight *= policy.decay;
            carried += score * weight;
        }
        let adjusted_score = latest.raw_score + carried;

        let is_high = |s: f64| s > policy.high_risk_threshold;
        let high_risk_events = prior.iter().filter(|s| is_high(**s)).count()
            + usize::from(is_high(latest.raw_score));

        let reason = if latest.raw_score > policy.hard_ceiling {
            Some(EscalationReason::HardCeiling)
        } else if high_risk_events >= policy.min_high_risk_events {
            Some(EscalationReason::SustainedHighRisk {
                events: high_risk_events,
            })
        } else {
            None
        };

        EscalationVerdict {
            adjusted_score,
            escalated: reason.is_some(),
            reason,
            high_risk_events,
            history_len: prior.len(),
            level: RiskLevel::from_score(adjusted_score),
        }
    }

    /// Evaluate `score` against the history, then record it.
    pub fn observe(
        &mut self,
        source_id: &str,
        score: &ScoreResult,
        text_length: usize,
        at: Instant,
    ) -> EscalationVerdict {
        let verdict = self.evaluate(source_id, score);
        if verdict.escalated {
            tracing::info!(
                source = source_id,
                adjusted = verdict.adjusted_score,
                reason = ?verdict.reason,
                "source escalated"
            );
        }
        self.record(
            source_id,
            TimelineEvent {
                timestamp: at,
                source_id: source_id.to_string(),
                score: score.clone(),
                text_length,
            },
        );
        verdict
    }
}
