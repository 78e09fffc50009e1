//! Text normalization for scoring.
//!
//! Produces two deterministic views of an input:
//! - `folded`: NFKC + lowercase + collapsed whitespace, used by regex patterns
//! - `tokens`: `folded` with punctuation turned into word breaks, used by phrases
//!
//! Runs of single letters are joined back into one token, which repairs the
//! way speech recognizers spell out acronyms ("o t p" → "otp").

use unicode_normalization::UnicodeNormalization;

/// Minimum token length for typo-tolerant comparison.
pub const MIN_FUZZY_TOKEN_LEN: usize = 5;

/// Minimum run of single-letter tokens that gets joined into one token.
const SPELLED_RUN_MIN: usize = 3;

/// Normalized views of one input text.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedText {
    /// Case-folded text with collapsed whitespace (punctuation kept).
    pub folded: String,
    /// Word tokens, punctuation stripped.
    pub tokens: Vec<String>,
}

impl NormalizedText {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty() && self.folded.is_empty()
    }
}

/// Normalize `text` for matching. Pure and deterministic.
pub fn normalize(text: &str) -> NormalizedText {
    let folded = fold(text);
    let tokens = tokenize_folded(&folded);
    NormalizedText { folded, tokens }
}

/// NFKC, lowercase, collapse whitespace.
pub fn fold(text: &str) -> String {
    let lowered: String = text.nfkc().flat_map(char::to_lowercase).collect();
    lowered.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Tokenize arbitrary text with the same rules used for scoring input.
pub fn tokenize(text: &str) -> Vec<String> {
    tokenize_folded(&fold(text))
}

fn tokenize_folded(folded: &str) -> Vec<String> {
    let raw: Vec<&str> = folded
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();
    join_spelled_runs(&raw)
}

fn join_spelled_runs(raw: &[&str]) -> Vec<String> {
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let run_end = raw[i..]
            .iter()
            .position(|t| !is_single_letter(t))
            .map_or(raw.len(), |p| i + p);
        if run_end - i >= SPELLED_RUN_MIN {
            out.push(raw[i..run_end].concat());
            i = run_end;
        } else {
            out.push(raw[i].to_string());
            i += 1;
        }
    }
    out
}

fn is_single_letter(token: &str) -> bool {
    let mut chars = token.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic())
}

/// Compare two normalized tokens, allowing up to `max_typos` edits on long tokens.
pub fn tokens_match(candidate: &str, target: &str, max_typos: usize) -> bool {
    if candidate == target {
        return true;
    }
    if max_typos == 0
        || candidate.chars().count() < MIN_FUZZY_TOKEN_LEN
        || target.chars().count() < MIN_FUZZY_TOKEN_LEN
    {
        return false;
    }
    strsim::levenshtein(candidate, target) <= max_typos
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_and_whitespace() {
        let n = normalize("  URGENT:\tVerify   your\naccount!  ");
        assert_eq!(n.folded, "urgent: verify your account!");
        assert_eq!(n.tokens, vec!["urgent", "verify", "your", "account"]);
    }

    #[test]
    fn empty_and_blank_are_identical() {
        assert_eq!(normalize(""), normalize("   \n\t"));
        assert!(normalize(" ").is_empty());
    }

    #[test]
    fn nfkc_folds_fullwidth_letters() {
        assert_eq!(normalize("ＵＲＧＥＮＴ").tokens, vec!["urgent"]);
    }

    #[test]
    fn spelled_acronyms_are_joined() {
        assert_eq!(
            tokenize("please read the O T P now"),
            vec!["please", "read", "the", "otp", "now"]
        );
        // Two letters are left alone.
        assert_eq!(tokenize("a b test"), vec!["a", "b", "test"]);
    }

    #[test]
    fn punctuation_splits_urls() {
        assert_eq!(
            tokenize("https://example.com"),
            vec!["https", "example", "com"]
        );
    }

    #[test]
    fn typo_tolerance_only_on_long_tokens() {
        assert!(tokens_match("verify", "verify", 0));
        assert!(!tokens_match("verfy", "verify", 0));
        assert!(tokens_match("verfy", "verify", 1));
        assert!(!tokens_match("pin", "pen", 1));
    }
}
