//! Stateless risk scoring of a single text.
//!
//! `score(text)` normalizes the input once, counts every phrase bank entry
//! against it and sums `weight × counted matches` per category. The result is
//! a pure function of the text and the bank.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::normalize;
use crate::phrase_bank::PhraseBank;

// ── RiskLevel ──────────────────────────────────────────────────────────────

/// Coarse band for a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::Critical
        } else if score >= 70.0 {
            Self::High
        } else if score >= 50.0 {
            Self::Medium
        } else if score >= 25.0 {
            Self::Low
        } else {
            Self::Minimal
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minimal => write!(f, "minimal"),
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ── ScoreResult ────────────────────────────────────────────────────────────

/// One category's share of a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMatch {
    pub category: String,
    /// Matches counted after per-entry caps.
    pub count: u32,
    /// `weight × count`.
    pub contribution: f64,
    /// Distinct patterns that matched, in bank order.
    pub matched: Vec<String>,
}

/// Score for a single text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreResult {
    pub raw_score: f64,
    /// Ordered by descending contribution, then category name.
    pub matched_categories: Vec<CategoryMatch>,
}

impl ScoreResult {
    pub fn level(&self) -> RiskLevel {
        RiskLevel::from_score(self.raw_score)
    }

    pub fn is_clean(&self) -> bool {
        self.matched_categories.is_empty()
    }

    pub fn category(&self, name: &str) -> Option<&CategoryMatch> {
        self.matched_categories.iter().find(|c| c.category == name)
    }
}

// ── Scorer ─────────────────────────────────────────────────────────────────

/// Scores text against a shared phrase bank.
#[derive(Debug, Clone)]
pub struct Scorer {
    bank: Arc<PhraseBank>,
}

impl Scorer {
    pub fn new(bank: Arc<PhraseBank>) -> Self {
        Self { bank }
    }

    pub fn bank(&self) -> &PhraseBank {
        &self.bank
    }

    /// Score one text. Empty or blank input yields an empty result.
    pub fn score(&self, text: &str) -> ScoreResult {
        let normalized = normalize::normalize(text);
        if normalized.is_empty() {
            return ScoreResult::default();
        }

        let mut by_category: BTreeMap<&str, CategoryMatch> = BTreeMap::new();
        for entry in self.bank.lookup_patterns() {
            let count = entry.counted_matches(&normalized);
            if count == 0 {
                continue;
            }
            let slot = by_category
                .entry(entry.category.as_str())
                .or_insert_with(|| CategoryMatch {
                    category: entry.category.clone(),
                    count: 0,
                    contribution: 0.0,
                    matched: Vec::new(),
                });
            slot.count += count;
            slot.contribution += entry.weight * f64::from(count);
            let pattern = entry.pattern.as_str();
            if !slot.matched.iter().any(|m| m == pattern) {
                slot.matched.push(pattern.to_string());
            }
        }

        let mut matched_categories: Vec<CategoryMatch> = by_category.into_values().collect();
        matched_categories.sort_by(|a, b| {
            b.contribution
                .partial_cmp(&a.contribution)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.category.cmp(&b.category))
        });

        // Summed in output order so the entries add up to exactly raw_score.
        let raw_score = matched_categories
            .iter()
            .fold(0.0, |acc, c| acc + c.contribution);

        tracing::debug!(
            raw_score,
            categories = matched_categories.len(),
            tokens = normalized.tokens.len(),
            "scored text"
        );

        ScoreResult {
            raw_score,
            matched_categories,
        }
    }
}
