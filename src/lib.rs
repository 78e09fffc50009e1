// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # scam-shield
//!
//! Offline scam-risk scoring for text and recorded calls.
//!
//! ## Architecture
//!
//! - **Phrase bank** (`phrase_bank`): weighted scam-indicator categories, built in or TOML
//! - **Scorer** (`scorer`): stateless per-text score with a category breakdown
//! - **Timelines** (`timeline`): per-source event windows, decayed history, escalation
//! - **Speech-to-text** (`stt`): whisper.cpp / Vosk behind one gateway, ffmpeg for decoding
//! - **Conversation** (`conversation`): turn-taking speakers and composite rules for calls
//! - **Drop folder** (`pipeline`): inbox of audio files → outbox of JSON result records
//! - **Shield** (`shield`): the context object owning all of the above
//!
//! ## Library usage
//!
//! ```no_run
//! use scam_shield::config::ShieldConfig;
//! use scam_shield::shield::Shield;
//!
//! let config = ShieldConfig::load(None).unwrap();
//! let mut shield = Shield::from_config(&config).unwrap();
//! let record = shield.assess("URGENT: verify your account now", Some("caller-7"));
//! println!("{}", record.render_text());
//! ```

pub mod config;
pub mod conversation;
pub mod error;
pub mod normalize;
pub mod phrase_bank;
pub mod pipeline;
pub mod record;
pub mod scorer;
pub mod shield;
pub mod stt;
pub mod timeline;
