//! Phrase bank: weighted scam-indicator categories.
//!
//! A bank is a list of categories, each with a non-negative weight, an
//! optional per-entry match cap and a set of patterns. Patterns are either
//! phrases (matched on normalized tokens, in order, tolerating a few filler
//! words) or regexes (matched on the case-folded text).
//!
//! The bank is validated once at load time. Scoring never fails.

use std::path::Path;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::normalize::{self, NormalizedText};

/// Filler tokens allowed between consecutive words of a phrase.
pub const MAX_FILLER_TOKENS: usize = 2;

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// A single trigger pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Word sequence. `tokens` is `source` run through the scoring tokenizer.
    Phrase { source: String, tokens: Vec<String> },
    /// Case-insensitive regex over the folded text.
    Regex(Regex),
}

impl Pattern {
    fn phrase(category: &str, source: &str) -> ConfigResult<Self> {
        let tokens = normalize::tokenize(source);
        if tokens.is_empty() {
            return Err(ConfigError::InvalidPattern {
                category: category.to_string(),
                pattern: source.to_string(),
                message: "phrase contains no words".into(),
            });
        }
        Ok(Self::Phrase {
            source: source.to_string(),
            tokens,
        })
    }

    fn regex(category: &str, source: &str) -> ConfigResult<Self> {
        RegexBuilder::new(source)
            .case_insensitive(true)
            .build()
            .map(Self::Regex)
            .map_err(|e| ConfigError::InvalidPattern {
                category: category.to_string(),
                pattern: source.to_string(),
                message: e.to_string(),
            })
    }

    /// The pattern as written in the bank.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Phrase { source, .. } => source,
            Self::Regex(re) => re.as_str(),
        }
    }

    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Regex(_))
    }

    /// Count non-overlapping occurrences in `text`.
    pub fn count_in(&self, text: &NormalizedText, typo_tolerance: usize) -> u32 {
        match self {
            Self::Regex(re) => re.find_iter(&text.folded).count() as u32,
            Self::Phrase { tokens, .. } => count_phrase(&text.tokens, tokens, typo_tolerance),
        }
    }
}

/// Greedy left-to-right count of `phrase` in `haystack`.
///
/// Each phrase word must follow the previous one within
/// [`MAX_FILLER_TOKENS`] intervening tokens. A match consumes the tokens it
/// spans, so occurrences never overlap.
fn count_phrase(haystack: &[String], phrase: &[String], typos: usize) -> u32 {
    let Some((first, rest)) = phrase.split_first() else {
        return 0;
    };
    let mut count = 0;
    let mut i = 0;
    while i < haystack.len() {
        if !normalize::tokens_match(&haystack[i], first, typos) {
            i += 1;
            continue;
        }
        match match_tail(haystack, i + 1, rest, typos) {
            Some(end) => {
                count += 1;
                i = end + 1;
            }
            None => i += 1,
        }
    }
    count
}

/// Match the remaining phrase words starting at `start`. Returns the index
/// of the last matched token (or `start - 1` for an empty tail).
fn match_tail(haystack: &[String], start: usize, rest: &[String], typos: usize) -> Option<usize> {
    let mut last = start.checked_sub(1)?;
    for word in rest {
        let from = last + 1;
        let to = (from + MAX_FILLER_TOKENS + 1).min(haystack.len());
        let hit = (from..to).find(|&j| normalize::tokens_match(&haystack[j], word, typos))?;
        last = hit;
    }
    Some(last)
}

// ---------------------------------------------------------------------------
// Entries and categories
// ---------------------------------------------------------------------------

/// One pattern bound to its category's weight.
#[derive(Debug, Clone)]
pub struct PhraseEntry {
    pub category: String,
    pub pattern: Pattern,
    pub weight: f64,
    /// Maximum matches counted for this entry. `None` = linear, uncapped.
    pub cap: Option<u32>,
    /// Maximum edit distance per token (long tokens only).
    pub typo_tolerance: usize,
}

impl PhraseEntry {
    /// Matches in `text` after applying the per-entry cap.
    pub fn counted_matches(&self, text: &NormalizedText) -> u32 {
        let raw = self.pattern.count_in(text, self.typo_tolerance);
        match self.cap {
            Some(cap) => raw.min(cap),
            None => raw,
        }
    }
}

/// Serialized category definition (TOML `[[category]]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryDef {
    pub name: String,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap: Option<u32>,
    #[serde(default)]
    pub typo_tolerance: usize,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub phrases: Vec<String>,
    #[serde(default)]
    pub regexes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BankFile {
    #[serde(rename = "category", default)]
    categories: Vec<CategoryDef>,
}

// ---------------------------------------------------------------------------
// PhraseBank
// ---------------------------------------------------------------------------

/// Immutable, validated phrase bank.
#[derive(Debug, Clone)]
pub struct PhraseBank {
    entries: Vec<PhraseEntry>,
    categories: Vec<CategoryDef>,
}

impl PhraseBank {
    /// Build and validate a bank from category definitions.
    pub fn from_definitions(defs: Vec<CategoryDef>) -> ConfigResult<Self> {
        let mut entries = Vec::new();
        let mut seen: Vec<&str> = Vec::with_capacity(defs.len());

        for def in &defs {
            if seen.contains(&def.name.as_str()) {
                return Err(ConfigError::DuplicateCategory {
                    name: def.name.clone(),
                });
            }
            seen.push(&def.name);

            if !def.weight.is_finite() {
                return Err(ConfigError::NonFiniteWeight {
                    category: def.name.clone(),
                });
            }
            if def.weight < 0.0 {
                return Err(ConfigError::NegativeWeight {
                    category: def.name.clone(),
                    weight: def.weight,
                });
            }
            if def.phrases.is_empty() && def.regexes.is_empty() {
                return Err(ConfigError::EmptyCategory {
                    name: def.name.clone(),
                });
            }

            let phrases = def.phrases.iter().map(|p| Pattern::phrase(&def.name, p));
            let regexes = def.regexes.iter().map(|r| Pattern::regex(&def.name, r));
            for pattern in phrases.chain(regexes) {
                entries.push(PhraseEntry {
                    category: def.name.clone(),
                    pattern: pattern?,
                    weight: def.weight,
                    cap: def.cap,
                    typo_tolerance: def.typo_tolerance,
                });
            }
        }

        tracing::debug!(
            categories = defs.len(),
            entries = entries.len(),
            "phrase bank loaded"
        );
        Ok(Self {
            entries,
            categories: defs,
        })
    }

    /// Parse a TOML bank.
    pub fn from_toml_str(content: &str, origin: &str) -> ConfigResult<Self> {
        let file: BankFile = toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })?;
        Self::from_definitions(file.categories)
    }

    /// Load a TOML bank from disk.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// The compiled-in default bank.
    pub fn builtin() -> ConfigResult<Self> {
        let defs = BUILTIN
            .iter()
            .map(|b| CategoryDef {
                name: b.name.to_string(),
                weight: b.weight,
                cap: b.cap,
                typo_tolerance: b.typo_tolerance,
                description: b.description.to_string(),
                phrases: b.phrases.iter().map(|s| s.to_string()).collect(),
                regexes: b.regexes.iter().map(|s| s.to_string()).collect(),
            })
            .collect();
        Self::from_definitions(defs)
    }

    /// All entries in definition order.
    pub fn lookup_patterns(&self) -> &[PhraseEntry] {
        &self.entries
    }

    /// Category definitions in definition order.
    pub fn categories(&self) -> &[CategoryDef] {
        &self.categories
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Built-in bank
// ---------------------------------------------------------------------------

struct BuiltinCategory {
    name: &'static str,
    weight: f64,
    cap: Option<u32>,
    typo_tolerance: usize,
    description: &'static str,
    phrases: &'static [&'static str],
    regexes: &'static [&'static str],
}

const BUILTIN: &[BuiltinCategory] = &[
    BuiltinCategory {
        name: "PRESSURE_URGENCY",
        weight: 10.0,
        cap: Some(3),
        typo_tolerance: 0,
        description: "Pressure or urgency language.",
        phrases: &[
            "urgent",
            "immediately",
            "act now",
            "asap",
            "final notice",
            "last chance",
            "limited time",
            "right now",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "CREDENTIAL_OTP",
        weight: 20.0,
        cap: None,
        typo_tolerance: 0,
        description: "One-time codes, passwords or PINs requested.",
        phrases: &[
            "otp",
            "one time password",
            "verification code",
            "security code",
            "share the code",
            "send the code",
            "password",
            "pin",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "CREDENTIAL_HARVESTING",
        weight: 20.0,
        cap: None,
        typo_tolerance: 0,
        description: "Card or account details requested.",
        phrases: &[
            "confirm your card",
            "card number",
            "account number",
            "expiry date",
            "cvv",
            "verify your account",
            "confirm your identity",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "PAYMENT_METHOD_RISK",
        weight: 20.0,
        cap: None,
        typo_tolerance: 0,
        description: "High-risk payment methods (gift cards, crypto, wire).",
        phrases: &[
            "gift card",
            "wire transfer",
            "bank transfer",
            "send bitcoin",
            "crypto wallet",
            "usdt",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "OFF_PLATFORM",
        weight: 8.0,
        cap: None,
        typo_tolerance: 0,
        description: "Attempts to move the conversation elsewhere.",
        phrases: &["whatsapp", "telegram", "dm me", "message me"],
        regexes: &[],
    },
    BuiltinCategory {
        name: "SECRECY",
        weight: 12.0,
        cap: None,
        typo_tolerance: 0,
        description: "Secrecy or isolation requests.",
        phrases: &[
            "keep this confidential",
            "do not tell anyone",
            "don't tell anyone",
            "keep it secret",
            "between you and me",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "AUTHORITY_IMPERSONATION",
        weight: 12.0,
        cap: None,
        typo_tolerance: 0,
        description: "Bank, police or support impersonation.",
        phrases: &[
            "bank officer",
            "security team",
            "customer support",
            "tech support",
            "police",
            "income tax",
            "customs",
            "fraud department",
            "security department",
            "visa department",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "ESCALATION_WARNING",
        weight: 8.0,
        cap: None,
        typo_tolerance: 0,
        description: "Warnings about account suspension or unusual activity.",
        phrases: &[
            "final warning",
            "account will be suspended",
            "account will be blocked",
            "unusual activity",
            "kyc update",
            "update your kyc",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "ESCALATION_THREAT",
        weight: 15.0,
        cap: None,
        typo_tolerance: 0,
        description: "Legal threats, arrest or account freezes.",
        phrases: &[
            "legal action",
            "police case",
            "court notice",
            "warrant",
            "arrest",
            "freeze your account",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "ACTION_REQUEST",
        weight: 10.0,
        cap: None,
        typo_tolerance: 0,
        description: "Explicit requests to act.",
        phrases: &[
            "click the link",
            "read me the code",
            "tell me the code",
            "press one to",
            "press 1 to",
            "stay on the line",
            "install anydesk",
            "install teamviewer",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "FINANCIAL_ACCOUNT",
        weight: 6.0,
        cap: None,
        typo_tolerance: 0,
        description: "Bank account discussion.",
        phrases: &[
            "bank account",
            "checking account",
            "savings account",
            "routing number",
            "iban",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "KNOWN_SCAM_SCRIPT",
        weight: 25.0,
        cap: None,
        typo_tolerance: 1,
        description: "Fragments of known phone scam scripts.",
        phrases: &[
            "due to increase in computer related fraud",
            "card holders are held responsible",
            "we underwrite all fraud charges",
            "you will receive a package",
            "congratulations you won",
            "claim your prize",
        ],
        regexes: &[],
    },
    BuiltinCategory {
        name: "CONTAINS_URL",
        weight: 12.0,
        cap: Some(1),
        typo_tolerance: 0,
        description: "Links are a common phishing vector.",
        phrases: &[],
        regexes: &[r"(?:https?://\S+|www\.\S+)"],
    },
    BuiltinCategory {
        name: "CONTAINS_PHONE",
        weight: 6.0,
        cap: Some(1),
        typo_tolerance: 0,
        description: "Phone numbers used to move off-platform.",
        phrases: &[],
        regexes: &[r"\+?\d[\d\- ]{7,}\d"],
    },
    BuiltinCategory {
        name: "MENTIONS_MONEY",
        weight: 6.0,
        cap: Some(1),
        typo_tolerance: 0,
        description: "Money amounts.",
        phrases: &[],
        regexes: &[
            r"(?:₹|\$|€|£)\s*\d+(?:[.,]\d+)?",
            r"\b\d+(?:[.,]\d+)?\s*(?:dollars|rupees|euros|pounds|usd|inr)\b",
        ],
    },
];
