//! Drop-folder pipeline tests with an in-process recognizer.
//!
//! Audio fixtures are real 16 kHz mono WAV files written with `hound`; the
//! recognizer is a scripted `SttBackend` that returns a transcript per file
//! name, so no external binaries are needed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use scam_shield::error::{SttError, SttResult};
use scam_shield::phrase_bank::PhraseBank;
use scam_shield::pipeline::{DropFolder, FileOutcome, PipelineConfig, ScanReport, StopSignal};
use scam_shield::record::{ErrorKind, ResultRecord};
use scam_shield::shield::Shield;
use scam_shield::stt::{Segment, SttBackend, SttGateway, TranscribeOptions, TranscriptResult};
use scam_shield::timeline::EscalationPolicy;

const SCAM_CALL: &str = "This is the fraud department. Your account will be suspended \
                         immediately. Read me the verification code and buy a gift card.";

struct Scripted {
    transcripts: HashMap<String, String>,
}

impl Scripted {
    fn new(pairs: &[(&str, &str)]) -> Self {
        Self {
            transcripts: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl SttBackend for Scripted {
    fn name(&self) -> &'static str {
        "whisper"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn accepts(&self, _path: &Path) -> bool {
        true
    }

    fn transcribe(&self, path: &Path, _: &TranscribeOptions) -> SttResult<TranscriptResult> {
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        if name.contains("corrupt") {
            return Err(SttError::Transcription {
                backend: "whisper".into(),
                path: path.display().to_string(),
                message: "failed to read audio".into(),
            });
        }
        let text = self.transcripts.get(&name).cloned().unwrap_or_default();
        let segments = if text.is_empty() {
            Vec::new()
        } else {
            vec![Segment {
                start: 0.0,
                end: 2.0,
                text: text.clone(),
            }]
        };
        Ok(TranscriptResult {
            text,
            backend_name: "whisper".into(),
            confidence: None,
            duration_seconds: None,
            language: Some("en".into()),
            segments,
        })
    }
}

struct Fixture {
    dir: tempfile::TempDir,
    inbox: PathBuf,
    outbox: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let outbox = dir.path().join("outbox");
        std::fs::create_dir_all(&inbox).unwrap();
        Self {
            dir,
            inbox,
            outbox,
        }
    }

    fn config(&self) -> PipelineConfig {
        PipelineConfig {
            settle_secs: 0,
            ..PipelineConfig::with_dirs(&self.inbox, &self.outbox)
        }
    }

    fn wav(&self, name: &str, samples: usize) -> PathBuf {
        write_wav(&self.inbox.join(name), samples)
    }

    /// Write the WAV next to the inbox, then rename it in, so a concurrent
    /// scan never sees a half-written file.
    fn drop_in(&self, name: &str, samples: usize) {
        let staged = write_wav(&self.dir.path().join(name), samples);
        std::fs::create_dir_all(&self.inbox).unwrap();
        std::fs::rename(staged, self.inbox.join(name)).unwrap();
    }

    fn wait_for_artifact(&self, artifact: &str) {
        let deadline = Instant::now() + Duration::from_secs(20);
        while !self.outbox.join(artifact).is_file() {
            assert!(Instant::now() < deadline, "{artifact} never appeared");
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    fn artifacts(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.outbox)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn record(&self, artifact: &str) -> ResultRecord {
        let json = std::fs::read_to_string(self.outbox.join(artifact)).unwrap();
        serde_json::from_str(&json).unwrap()
    }
}

fn write_wav(path: &Path, samples: usize) -> PathBuf {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..samples {
        writer.write_sample((i % 64) as i16).unwrap();
    }
    writer.finalize().unwrap();
    path.to_path_buf()
}

fn shield_with(backends: Vec<Box<dyn SttBackend>>) -> Shield {
    Shield::new(
        PhraseBank::builtin().unwrap(),
        EscalationPolicy::default(),
        SttGateway::with_backends(backends, TranscribeOptions::default()),
    )
}

fn scripted(pairs: &[(&str, &str)]) -> Shield {
    shield_with(vec![Box::new(Scripted::new(pairs))])
}

#[test]
fn same_file_twice_yields_one_artifact() {
    let fx = Fixture::new();
    fx.wav("call.wav", 1600);
    let mut shield = scripted(&[("call.wav", "hello")]);

    let mut drop_folder = DropFolder::new(&mut shield, fx.config()).unwrap();
    let first = drop_folder.run_once().unwrap();
    let second = drop_folder.run_once().unwrap();

    assert_eq!(first.processed, 1);
    assert_eq!(
        second,
        ScanReport {
            skipped: 1,
            ..ScanReport::default()
        }
    );
    assert_eq!(fx.artifacts(), vec!["call.wav.json"]);
}

#[test]
fn restart_rebuilds_ledger_from_outbox() {
    let fx = Fixture::new();
    fx.wav("call.wav", 1600);

    let mut shield = scripted(&[]);
    DropFolder::new(&mut shield, fx.config())
        .unwrap()
        .run_once()
        .unwrap();

    let mut fresh = scripted(&[]);
    let mut drop_folder = DropFolder::new(&mut fresh, fx.config()).unwrap();
    assert_eq!(drop_folder.ledger().len(), 1);
    assert_eq!(drop_folder.run_once().unwrap().skipped, 1);
}

#[test]
fn changed_content_is_reprocessed() {
    let fx = Fixture::new();
    let path = fx.wav("call.wav", 1600);
    let mut shield = scripted(&[]);
    let mut drop_folder = DropFolder::new(&mut shield, fx.config()).unwrap();

    assert_eq!(drop_folder.process_file(&path), FileOutcome::Processed);
    let before = fx.record("call.wav.json");

    fx.wav("call.wav", 3200);
    assert_eq!(drop_folder.process_file(&path), FileOutcome::Processed);
    let after = fx.record("call.wav.json");

    assert_ne!(before.fingerprint(), after.fingerprint());
    assert_eq!(fx.artifacts().len(), 1);
}

#[test]
fn clean_audio_scores_zero() {
    let fx = Fixture::new();
    fx.wav("clean.wav", 16_000);
    let mut shield = scripted(&[("clean.wav", "hi, see you at dinner tonight")]);

    let report = DropFolder::new(&mut shield, fx.config())
        .unwrap()
        .run_once()
        .unwrap();
    assert_eq!(report.processed, 1);

    let record = fx.record("clean.wav.json");
    assert!(record.error.is_none());
    assert_eq!(record.score.as_ref().unwrap().raw_score, 0.0);
    assert!(!record.verdict.as_ref().unwrap().escalated);

    let transcript = record.transcript.unwrap();
    assert_eq!(transcript.backend_name, "whisper");
    assert_eq!(transcript.duration_seconds, Some(1.0));
}

#[test]
fn no_backend_is_recorded_not_fatal() {
    let fx = Fixture::new();
    fx.wav("a.wav", 1600);
    fx.wav("b.wav", 1600);
    let mut shield = shield_with(Vec::new());

    let report = DropFolder::new(&mut shield, fx.config())
        .unwrap()
        .run_once()
        .unwrap();
    assert_eq!(report.failed, 2);

    let record = fx.record("a.wav.json");
    let error = record.error.as_ref().unwrap();
    assert_eq!(error.kind, ErrorKind::BackendUnavailable);
    assert!(record.score.is_none());

    // Text scoring is unaffected.
    assert!(shield.score_text("urgent: send the code").raw_score > 0.0);
}

#[test]
fn backend_failure_is_per_file() {
    let fx = Fixture::new();
    fx.wav("a_corrupt.wav", 1600);
    fx.wav("b_fine.wav", 1600);
    let mut shield = scripted(&[("b_fine.wav", "ok")]);

    let report = DropFolder::new(&mut shield, fx.config())
        .unwrap()
        .run_once()
        .unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.processed, 1);
    assert_eq!(
        fx.record("a_corrupt.wav.json").error.unwrap().kind,
        ErrorKind::Transcription
    );
    assert!(fx.record("b_fine.wav.json").error.is_none());
}

#[test]
fn partial_file_is_deferred_then_downgraded() {
    let fx = Fixture::new();
    std::fs::write(fx.inbox.join("partial.wav"), b"").unwrap();
    let mut shield = scripted(&[]);
    let config = PipelineConfig {
        max_retries: 1,
        ..fx.config()
    };
    let mut drop_folder = DropFolder::new(&mut shield, config).unwrap();

    let first = drop_folder.run_once().unwrap();
    assert_eq!(first.deferred, 1);
    assert!(fx.artifacts().is_empty());

    let second = drop_folder.run_once().unwrap();
    assert_eq!(second.failed, 1);
    let error = fx.record("partial.wav.json").error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transcription);
    assert_eq!(error.attempts, 2);

    // Recorded once; later scans skip it.
    assert_eq!(drop_folder.run_once().unwrap().skipped, 1);
}

#[test]
fn recently_modified_file_waits_for_settle_window() {
    let fx = Fixture::new();
    fx.wav("fresh.wav", 1600);
    let mut shield = scripted(&[]);
    let config = PipelineConfig {
        settle_secs: 3600,
        ..fx.config()
    };
    let report = DropFolder::new(&mut shield, config)
        .unwrap()
        .run_once()
        .unwrap();
    assert_eq!(report.deferred, 1);
    assert!(fx.artifacts().is_empty());
}

#[test]
fn per_source_escalation_across_files() {
    let fx = Fixture::new();
    fx.wav("caller7__001.wav", 1600);
    fx.wav("caller7__002.wav", 1600);
    fx.wav("other__001.wav", 1600);
    let mut shield = scripted(&[
        ("caller7__001.wav", SCAM_CALL),
        ("caller7__002.wav", SCAM_CALL),
        ("other__001.wav", SCAM_CALL),
    ]);

    DropFolder::new(&mut shield, fx.config())
        .unwrap()
        .run_once()
        .unwrap();

    let first = fx.record("caller7__001.wav.json");
    let second = fx.record("caller7__002.wav.json");
    let other = fx.record("other__001.wav.json");

    assert_eq!(first.source_id, "caller7");
    assert!(!first.verdict.unwrap().escalated);
    assert!(second.verdict.unwrap().escalated);
    assert_eq!(other.source_id, "other");
    assert_eq!(other.verdict.unwrap().history_len, 0);
}

#[test]
fn archive_moves_handled_files() {
    let fx = Fixture::new();
    fx.wav("good.wav", 1600);
    fx.wav("x_corrupt.wav", 1600);
    std::fs::write(fx.inbox.join("notes.txt"), "not audio").unwrap();
    let mut shield = scripted(&[]);
    let config = PipelineConfig {
        archive: true,
        ..fx.config()
    };

    DropFolder::new(&mut shield, config)
        .unwrap()
        .run_once()
        .unwrap();

    assert!(fx.inbox.join("processed/good.wav").is_file());
    assert!(fx.inbox.join("failed/x_corrupt.wav").is_file());
    assert!(!fx.inbox.join("good.wav").exists());
    // Non-audio files are left alone.
    assert!(fx.inbox.join("notes.txt").is_file());
}

#[test]
fn missing_inbox_is_an_error_in_one_shot_mode() {
    let fx = Fixture::new();
    let mut shield = scripted(&[]);
    let config = PipelineConfig::with_dirs(fx.inbox.join("nope"), &fx.outbox);
    let mut drop_folder = DropFolder::new(&mut shield, config).unwrap();
    assert!(drop_folder.run_once().is_err());
}

#[test]
fn rewritten_names_get_their_own_artifact() {
    let fx = Fixture::new();
    fx.wav("my call.wav", 1600);
    fx.wav("my_call.wav", 3200);
    let mut shield = scripted(&[]);

    {
        let mut drop_folder = DropFolder::new(&mut shield, fx.config()).unwrap();
        assert_eq!(drop_folder.run_once().unwrap().processed, 2);
        assert_eq!(drop_folder.run_once().unwrap().skipped, 2);
        assert_eq!(drop_folder.run_once().unwrap().skipped, 2);
    }

    let artifacts = fx.artifacts();
    assert_eq!(artifacts.len(), 2);
    assert!(artifacts.contains(&"my_call.wav.json".to_string()));
    assert_eq!(shield.tracker().timeline("default").unwrap().len(), 2);
}

#[test]
fn outbox_write_failure_is_bounded_and_not_recorded() {
    let fx = Fixture::new();
    fx.wav("call.wav", 1600);
    // A directory where the artifact should go makes every write fail.
    std::fs::create_dir_all(fx.outbox.join("call.wav.json")).unwrap();
    let mut shield = scripted(&[("call.wav", SCAM_CALL)]);
    let config = PipelineConfig {
        max_retries: 1,
        ..fx.config()
    };

    {
        let mut drop_folder = DropFolder::new(&mut shield, config).unwrap();
        assert_eq!(drop_folder.run_once().unwrap().failed, 1);
        assert_eq!(drop_folder.run_once().unwrap().failed, 1);
        assert_eq!(drop_folder.run_once().unwrap().skipped, 1);
    }

    assert!(shield.tracker().timeline("default").is_none());
}

#[test]
fn vanished_file_is_skipped() {
    let fx = Fixture::new();
    let mut shield = scripted(&[]);
    let mut drop_folder = DropFolder::new(&mut shield, fx.config()).unwrap();

    let outcome = drop_folder.process_file(&fx.inbox.join("gone.wav"));
    assert_eq!(outcome, FileOutcome::Skipped);
    assert!(fx.artifacts().is_empty());
}

#[test]
fn unreadable_file_is_recorded_once() {
    let fx = Fixture::new();
    // Opening a directory succeeds but reading it fails.
    let path = fx.inbox.join("folder.wav");
    std::fs::create_dir_all(&path).unwrap();
    let mut shield = scripted(&[]);
    let mut drop_folder = DropFolder::new(&mut shield, fx.config()).unwrap();

    assert_eq!(drop_folder.process_file(&path), FileOutcome::Failed);
    let record = fx.record("folder.wav.json");
    assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Io);
    assert!(record.fingerprint().unwrap().starts_with("meta:"));

    assert_eq!(drop_folder.process_file(&path), FileOutcome::Skipped);
    assert_eq!(fx.artifacts(), vec!["folder.wav.json"]);
}

#[test]
fn audio_records_carry_a_conversation_assessment() {
    let fx = Fixture::new();
    fx.wav("call.wav", 1600);
    let mut shield = scripted(&[("call.wav", SCAM_CALL)]);
    DropFolder::new(&mut shield, fx.config())
        .unwrap()
        .run_once()
        .unwrap();

    let record = fx.record("call.wav.json");
    let conversation = record.conversation.unwrap();
    let raw = record.score.unwrap().raw_score;
    assert!(conversation.risk_score >= raw.min(100.0).floor());
    assert!(conversation.flags.iter().any(|f| f.starts_with("category:")));
    assert_eq!(conversation.turns.len(), 1);
    assert!(!conversation.summary.is_empty());
    assert_eq!(record.transcript.unwrap().segments.len(), 1);
}

#[test]
fn watch_picks_up_files_dropped_between_polls() {
    let fx = Fixture::new();
    fx.drop_in("first.wav", 1600);
    let mut shield = scripted(&[]);
    let config = PipelineConfig {
        poll_secs: 1,
        ..fx.config()
    };
    let mut drop_folder = DropFolder::new(&mut shield, config).unwrap();

    let stop = StopSignal::new();
    let report = std::thread::scope(|scope| {
        let remote = stop.clone();
        let fx = &fx;
        scope.spawn(move || {
            fx.wait_for_artifact("first.wav.json");
            fx.drop_in("second.wav", 1600);
            fx.wait_for_artifact("second.wav.json");
            remote.stop();
        });
        drop_folder.watch(&stop)
    });

    assert_eq!(report.processed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(report.deferred, 0);
    assert_eq!(fx.artifacts(), vec!["first.wav.json", "second.wav.json"]);
}

#[test]
fn watch_survives_a_missing_inbox() {
    let fx = Fixture::new();
    std::fs::remove_dir(&fx.inbox).unwrap();
    let mut shield = scripted(&[]);
    let config = PipelineConfig {
        poll_secs: 1,
        ..fx.config()
    };
    let mut drop_folder = DropFolder::new(&mut shield, config).unwrap();

    let stop = StopSignal::new();
    let report = std::thread::scope(|scope| {
        let remote = stop.clone();
        let fx = &fx;
        scope.spawn(move || {
            // Let at least one scan fail first.
            std::thread::sleep(Duration::from_millis(300));
            fx.drop_in("late.wav", 1600);
            fx.wait_for_artifact("late.wav.json");
            remote.stop();
        });
        drop_folder.watch(&stop)
    });

    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 0);
}
