//! End-to-end tests for text scoring and escalation.
//!
//! These tests go through the public API only: phrase bank loading,
//! scoring, per-source timelines and result records.

use std::sync::Arc;

use scam_shield::config::ShieldConfig;
use scam_shield::error::{ConfigError, ShieldError};
use scam_shield::phrase_bank::PhraseBank;
use scam_shield::scorer::{RiskLevel, Scorer};
use scam_shield::shield::Shield;
use scam_shield::stt::{SttGateway, TranscribeOptions};
use scam_shield::timeline::{EscalationPolicy, EscalationReason};

const SCENARIO_BANK: &str = r#"
[[category]]
name = "urgent"
weight = 5
phrases = ["urgent"]

[[category]]
name = "verify account"
weight = 8
phrases = ["verify account"]

[[category]]
name = "link click"
weight = 3
phrases = ["link click"]
"#;

fn offline_shield(bank: PhraseBank, policy: EscalationPolicy) -> Shield {
    Shield::new(
        bank,
        policy,
        SttGateway::with_backends(Vec::new(), TranscribeOptions::default()),
    )
}

#[test]
fn phishing_message_with_toml_bank() {
    let bank = PhraseBank::from_toml_str(SCENARIO_BANK, "scenario").unwrap();
    let scorer = Scorer::new(Arc::new(bank));

    let result = scorer.score("URGENT: Verify your account now! Click the link: https://example.com");
    assert!(result.raw_score > 0.0);
    assert!(result.category("urgent").unwrap().contribution > 0.0);
    assert!(result.category("verify account").unwrap().contribution > 0.0);

    let sum: f64 = result.matched_categories.iter().map(|c| c.contribution).sum();
    assert_eq!(sum, result.raw_score);
}

#[test]
fn bank_file_on_disk_via_config() {
    let dir = tempfile::TempDir::new().unwrap();
    let bank_path = dir.path().join("bank.toml");
    std::fs::write(&bank_path, SCENARIO_BANK).unwrap();

    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        format!(
            "phrase_bank = {:?}\n\n[escalation]\nhard_ceiling = 10\n",
            bank_path.display().to_string()
        ),
    )
    .unwrap();

    let config = ShieldConfig::from_file(&config_path).unwrap();
    let mut shield = Shield::from_config(&config).unwrap();
    assert_eq!(shield.scorer().bank().categories().len(), 3);

    let record = shield.assess("urgent, verify your account", Some("sms-1"));
    let verdict = record.verdict.unwrap();
    assert_eq!(record.score.unwrap().raw_score, 13.0);
    assert!(verdict.escalated);
    assert_eq!(verdict.reason, Some(EscalationReason::HardCeiling));
}

#[test]
fn malformed_bank_fails_at_load() {
    let negative = r#"
[[category]]
name = "bad"
weight = -1
phrases = ["x"]
"#;
    assert!(matches!(
        PhraseBank::from_toml_str(negative, "inline"),
        Err(ConfigError::NegativeWeight { .. })
    ));

    let non_numeric = r#"
[[category]]
name = "bad"
weight = "heavy"
phrases = ["x"]
"#;
    assert!(matches!(
        PhraseBank::from_toml_str(non_numeric, "inline"),
        Err(ConfigError::Parse { .. })
    ));
}

#[test]
fn invalid_config_is_fatal_before_processing() {
    let config = ShieldConfig {
        escalation: EscalationPolicy {
            decay: 2.0,
            ..EscalationPolicy::default()
        },
        ..ShieldConfig::default()
    };
    let err = Shield::from_config(&config).unwrap_err();
    assert!(matches!(err, ShieldError::Config(ConfigError::InvalidValue { .. })));
}

#[test]
fn conversation_escalates_over_time() {
    let mut shield = offline_shield(PhraseBank::builtin().unwrap(), EscalationPolicy::default());
    let source = Some("caller-9");

    let opener = shield.assess("Hello, this is customer support calling about your order.", source);
    assert!(!opener.verdict.as_ref().unwrap().escalated);

    let pressure = "Your account will be suspended immediately. Read me the verification code \
                    and buy a gift card. Keep it secret.";
    let first = shield.assess(pressure, source);
    let second = shield.assess(pressure, source);

    let v1 = first.verdict.unwrap();
    let v2 = second.verdict.unwrap();
    assert!(v2.escalated);
    assert!(v2.adjusted_score > v1.adjusted_score);
    assert_eq!(v2.history_len, 2);

    // A different caller starts clean.
    let other = shield.assess("hi, running late", Some("caller-10"));
    let v = other.verdict.unwrap();
    assert!(!v.escalated);
    assert_eq!(v.level, RiskLevel::Minimal);
}

#[test]
fn blank_input_is_not_an_error() {
    let mut shield = offline_shield(PhraseBank::builtin().unwrap(), EscalationPolicy::default());
    let record = shield.assess("   ", None);
    let score = record.score.unwrap();
    assert_eq!(score.raw_score, 0.0);
    assert!(score.matched_categories.is_empty());
    assert!(record.error.is_none());
}

#[test]
fn text_record_json_shape() {
    let mut shield = offline_shield(PhraseBank::builtin().unwrap(), EscalationPolicy::default());
    let record = shield.assess("send bitcoin to my crypto wallet", Some("chat-3"));
    let json: serde_json::Value = serde_json::from_str(&record.to_json().unwrap()).unwrap();

    assert_eq!(json["source"]["type"], "text");
    assert_eq!(json["source_id"], "chat-3");
    assert_eq!(json["score"]["matched_categories"][0]["category"], "PAYMENT_METHOD_RISK");
    assert_eq!(json["verdict"]["escalated"], false);
    assert!(json.get("error").is_none());
    assert!(json["timestamp"].is_string());
}
