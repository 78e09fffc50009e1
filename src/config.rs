//! Layered configuration: defaults, TOML file, environment, CLI flags.
//!
//! The file is looked up at `--config`, else at
//! `$XDG_CONFIG_HOME/scam-shield/config.toml` when present. Environment
//! variables (`SCAM_SHIELD_*`) override the file. The binary applies its own
//! flags last, and [`ShieldConfig::validate`] runs on the merged result.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::conversation::ConversationPolicy;
use crate::error::{ConfigError, ConfigResult};
use crate::pipeline::PipelineConfig;
use crate::stt::SttConfig;
use crate::timeline::EscalationPolicy;

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShieldConfig {
    /// Custom phrase bank (TOML). The built-in bank is used when unset.
    #[serde(default)]
    pub phrase_bank: Option<PathBuf>,
    #[serde(default)]
    pub escalation: EscalationPolicy,
    #[serde(default)]
    pub conversation: ConversationPolicy,
    #[serde(default)]
    pub stt: SttConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl ShieldConfig {
    /// Parse a TOML document. Missing sections and keys take defaults.
    pub fn from_toml_str(content: &str, origin: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Defaults, then the config file, then the process environment.
    ///
    /// An explicit `path` must exist; the XDG default is optional.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let env = |key: &str| std::env::var(key).ok();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path(env) {
                Some(default) if default.is_file() => {
                    tracing::debug!(path = %default.display(), "using default config file");
                    Self::from_file(&default)?
                }
                _ => Self::default(),
            },
        };
        config.apply_env(env)?;
        Ok(config)
    }

    /// Override fields from `SCAM_SHIELD_*` variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("SCAM_SHIELD_PHRASE_BANK") {
            self.phrase_bank = Some(PathBuf::from(v));
        }

        // [stt]
        if let Some(v) = get("SCAM_SHIELD_STT_BACKEND") {
            self.stt.backend = Some(v.trim().to_ascii_lowercase());
        }
        if let Some(v) = get("SCAM_SHIELD_LANGUAGE") {
            self.stt.language = Some(v.trim().to_string());
        }
        if let Some(v) = get("SCAM_SHIELD_WHISPER_BIN") {
            self.stt.whisper_bin = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SCAM_SHIELD_WHISPER_MODEL") {
            self.stt.whisper_model = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SCAM_SHIELD_VOSK_BIN") {
            self.stt.vosk_bin = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SCAM_SHIELD_VOSK_MODEL").or_else(|| get("VOSK_MODEL_PATH")) {
            self.stt.vosk_model = Some(PathBuf::from(v));
        }
        if let Some(v) = get("SCAM_SHIELD_TRANSCRIBE_TIMEOUT_SECS") {
            self.stt.timeout_secs = parse_env("SCAM_SHIELD_TRANSCRIBE_TIMEOUT_SECS", &v)?;
        }

        // [pipeline]
        if let Some(v) = get("SCAM_SHIELD_INBOX") {
            self.pipeline.inbox = PathBuf::from(v);
        }
        if let Some(v) = get("SCAM_SHIELD_OUTBOX") {
            self.pipeline.outbox = PathBuf::from(v);
        }
        if let Some(v) = get("SCAM_SHIELD_POLL_SECS") {
            self.pipeline.poll_secs = parse_env("SCAM_SHIELD_POLL_SECS", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_SETTLE_SECS") {
            self.pipeline.settle_secs = parse_env("SCAM_SHIELD_SETTLE_SECS", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_MAX_RETRIES") {
            self.pipeline.max_retries = parse_env("SCAM_SHIELD_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_ARCHIVE") {
            self.pipeline.archive = parse_bool("SCAM_SHIELD_ARCHIVE", &v)?;
        }

        // [escalation]
        if let Some(v) = get("SCAM_SHIELD_HIGH_RISK_THRESHOLD") {
            self.escalation.high_risk_threshold = parse_env("SCAM_SHIELD_HIGH_RISK_THRESHOLD", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_HARD_CEILING") {
            self.escalation.hard_ceiling = parse_env("SCAM_SHIELD_HARD_CEILING", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_MIN_HIGH_RISK_EVENTS") {
            self.escalation.min_high_risk_events =
                parse_env("SCAM_SHIELD_MIN_HIGH_RISK_EVENTS", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_DECAY") {
            self.escalation.decay = parse_env("SCAM_SHIELD_DECAY", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_MAX_EVENTS") {
            self.escalation.max_events = parse_env("SCAM_SHIELD_MAX_EVENTS", &v)?;
        }
        if let Some(v) = get("SCAM_SHIELD_IDLE_SECS") {
            self.escalation.idle_secs = parse_env("SCAM_SHIELD_IDLE_SECS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.escalation.validate()?;
        self.conversation.validate()?;
        self.stt.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}

/// `$XDG_CONFIG_HOME/scam-shield/config.toml`, falling back to `~/.config`.
pub fn default_config_path(lookup: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    let base = lookup("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| lookup("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("scam-shield").join("config.toml"))
}

fn parse_env<T: FromStr>(key: &str, raw: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            message: e.to_string(),
        })
}

fn parse_bool(key: &str, raw: &str) -> ConfigResult<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            message: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn empty_document_is_default() {
        let config = ShieldConfig::from_toml_str("", "inline").unwrap();
        assert_eq!(config, ShieldConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_sections_keep_defaults() {
        let config = ShieldConfig::from_toml_str(
            r#"
            [escalation]
            decay = 0.25

            [stt]
            backend = "vosk"
            language = "en"

            [pipeline]
            inbox = "/var/spool/calls"
            "#,
            "inline",
        )
        .unwrap();
        assert_eq!(config.escalation.decay, 0.25);
        assert_eq!(config.escalation.max_events, 20);
        assert_eq!(config.stt.backend.as_deref(), Some("vosk"));
        assert_eq!(config.stt.timeout_secs, 600);
        assert_eq!(config.pipeline.inbox, PathBuf::from("/var/spool/calls"));
        assert_eq!(config.pipeline.max_retries, 3);
    }

    #[test]
    fn conversation_section() {
        let config =
            ShieldConfig::from_toml_str("[conversation]\ngap_secs = 1.5\n", "inline").unwrap();
        assert_eq!(config.conversation.gap_secs, 1.5);
        assert_eq!(config.conversation.dominance_threshold, 0.6);

        let config =
            ShieldConfig::from_toml_str("[conversation]\ndominance_boost = 0.9\n", "inline")
                .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn env_overrides_file() {
        let mut config = ShieldConfig::from_toml_str("[escalation]\ndecay = 0.25\n", "inline").unwrap();
        config
            .apply_env(env(&[
                ("SCAM_SHIELD_DECAY", "0.75"),
                ("SCAM_SHIELD_STT_BACKEND", " Whisper "),
                ("SCAM_SHIELD_ARCHIVE", "yes"),
                ("VOSK_MODEL_PATH", "/models/vosk-en"),
                ("SCAM_SHIELD_POLL_SECS", "2"),
            ]))
            .unwrap();
        assert_eq!(config.escalation.decay, 0.75);
        assert_eq!(config.stt.backend.as_deref(), Some("whisper"));
        assert!(config.pipeline.archive);
        assert_eq!(config.stt.vosk_model, Some(PathBuf::from("/models/vosk-en")));
        assert_eq!(config.pipeline.poll_secs, 2);
    }

    #[test]
    fn scoped_vosk_model_wins() {
        let mut config = ShieldConfig::default();
        config
            .apply_env(env(&[
                ("VOSK_MODEL_PATH", "/generic"),
                ("SCAM_SHIELD_VOSK_MODEL", "/scoped"),
            ]))
            .unwrap();
        assert_eq!(config.stt.vosk_model, Some(PathBuf::from("/scoped")));
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let mut config = ShieldConfig::default();
        let err = config
            .apply_env(env(&[("SCAM_SHIELD_HARD_CEILING", "very high")]))
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "SCAM_SHIELD_HARD_CEILING"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn out_of_range_decay_fails_validation() {
        let mut config = ShieldConfig::default();
        config.apply_env(env(&[("SCAM_SHIELD_DECAY", "1.5")])).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn wrong_type_is_a_parse_error() {
        assert!(matches!(
            ShieldConfig::from_toml_str("[escalation]\ndecay = \"half\"\n", "inline"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ShieldConfig::from_file(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn xdg_default_path() {
        let path = default_config_path(env(&[("XDG_CONFIG_HOME", "/cfg"), ("HOME", "/home/u")]));
        assert_eq!(path, Some(PathBuf::from("/cfg/scam-shield/config.toml")));
        let path = default_config_path(env(&[("HOME", "/home/u")]));
        assert_eq!(
            path,
            Some(PathBuf::from("/home/u/.config/scam-shield/config.toml"))
        );
        assert_eq!(default_config_path(env(&[])), None);
    }
}
