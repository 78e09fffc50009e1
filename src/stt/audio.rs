//! Audio format detection and conversion to recognizer-ready WAV.
//!
//! Both recognizers want 16 kHz mono 16-bit PCM. Anything else is piped
//! through `ffmpeg` into a temporary WAV that lives as long as the returned
//! [`PreparedAudio`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{SttError, SttResult};

use super::process::{self, Invocation, RunOutcome};

/// Sample rate expected by the recognizers.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Extensions the gateway and the drop folder accept, lowercase.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["wav", "flac", "mp3", "ogg", "m4a"];

/// Container/codec family, from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Flac,
    Mp3,
    Ogg,
    M4a,
}

impl AudioFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "wav" => Some(Self::Wav),
            "flac" => Some(Self::Flac),
            "mp3" => Some(Self::Mp3),
            "ogg" => Some(Self::Ogg),
            "m4a" => Some(Self::M4a),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Flac => "flac",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::M4a => "m4a",
        }
    }

    /// Lossy formats that always need an external decoder.
    pub fn is_compressed(self) -> bool {
        matches!(self, Self::Mp3 | Self::Ogg | Self::M4a)
    }
}

/// Header facts of a WAV file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WavInfo {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
    pub is_float: bool,
    pub duration_seconds: f64,
}

impl WavInfo {
    /// 16 kHz mono 16-bit integer PCM.
    pub fn is_recognizer_ready(&self) -> bool {
        self.sample_rate == TARGET_SAMPLE_RATE
            && self.channels == 1
            && self.bits_per_sample == 16
            && !self.is_float
    }
}

/// Read the WAV header, or `None` if the file is not a readable WAV.
pub fn inspect_wav(path: &Path) -> Option<WavInfo> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    let duration_seconds = if spec.sample_rate == 0 {
        0.0
    } else {
        f64::from(reader.duration()) / f64::from(spec.sample_rate)
    };
    Some(WavInfo {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        bits_per_sample: spec.bits_per_sample,
        is_float: spec.sample_format == hound::SampleFormat::Float,
        duration_seconds,
    })
}

/// Whether a recognizer can read `path` without conversion.
pub fn is_recognizer_ready(path: &Path) -> bool {
    AudioFormat::from_path(path) == Some(AudioFormat::Wav)
        && inspect_wav(path).is_some_and(|info| info.is_recognizer_ready())
}

/// Fail early when the input cannot be opened.
///
/// Missing files are a hard error; anything else (locks, sharing violations,
/// permission flaps while a copy finishes) is reported as transient.
pub fn check_readable(path: &Path) -> SttResult<()> {
    match std::fs::File::open(path) {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SttError::transcription(
            "input",
            path,
            "file not found",
        )),
        Err(source) => Err(SttError::InputBusy {
            path: path.display().to_string(),
            source,
        }),
    }
}

/// Recognizer-ready audio produced by [`convert`].
#[derive(Debug)]
pub struct PreparedAudio {
    path: PathBuf,
    _dir: tempfile::TempDir,
}

impl PreparedAudio {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Convert `input` to 16 kHz mono WAV with `ffmpeg`.
pub fn convert(
    input: &Path,
    format: AudioFormat,
    ffmpeg: Option<&Path>,
    timeout: Duration,
) -> SttResult<PreparedAudio> {
    let Some(ffmpeg) = ffmpeg else {
        return Err(SttError::DecoderMissing {
            path: input.display().to_string(),
            format: format.extension().to_string(),
            decoder: "ffmpeg".to_string(),
        });
    };

    let dir = tempfile::Builder::new()
        .prefix("scam-shield-audio")
        .tempdir()
        .map_err(|e| SttError::transcription("ffmpeg", input, format!("temp dir: {e}")))?;
    let output = dir.path().join("input-16k.wav");

    let invocation = Invocation::new(ffmpeg, timeout)
        .arg("-nostdin")
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-i")
        .arg(input.as_os_str())
        .arg("-ac")
        .arg("1")
        .arg("-ar")
        .arg(TARGET_SAMPLE_RATE.to_string())
        .arg("-c:a")
        .arg("pcm_s16le")
        .arg(output.as_os_str());

    let outcome = process::run(&invocation, dir.path())
        .map_err(|e| SttError::transcription("ffmpeg", input, format!("spawn failed: {e}")))?;

    match outcome {
        RunOutcome::TimedOut => Err(SttError::Timeout {
            backend: "ffmpeg".to_string(),
            path: input.display().to_string(),
            secs: timeout.as_secs(),
        }),
        RunOutcome::Finished { status, stderr, .. } if !status.success() => Err(
            SttError::transcription("ffmpeg", input, process::summarize_failure(status, &stderr)),
        ),
        RunOutcome::Finished { .. } => {
            if !output.is_file() {
                return Err(SttError::transcription(
                    "ffmpeg",
                    input,
                    "decoder produced no output",
                ));
            }
            tracing::debug!(input = %input.display(), "converted to 16 kHz mono wav");
            Ok(PreparedAudio {
                path: output,
                _dir: dir,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: usize) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..samples * channels as usize {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn format_from_extension() {
        assert_eq!(
            AudioFormat::from_path(Path::new("call.WAV")),
            Some(AudioFormat::Wav)
        );
        assert_eq!(
            AudioFormat::from_path(Path::new("a/b/memo.m4a")),
            Some(AudioFormat::M4a)
        );
        assert_eq!(AudioFormat::from_path(Path::new("notes.txt")), None);
        assert_eq!(AudioFormat::from_path(Path::new("noext")), None);
        assert!(AudioFormat::Mp3.is_compressed());
        assert!(!AudioFormat::Flac.is_compressed());
    }

    #[test]
    fn header_reads_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("one_second.wav");
        write_wav(&path, 16_000, 1, 16_000);
        let info = inspect_wav(&path).unwrap();
        assert_eq!(info.duration_seconds, 1.0);
        assert!(info.is_recognizer_ready());
        assert!(is_recognizer_ready(&path));
    }

    #[test]
    fn stereo_wav_needs_conversion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");
        write_wav(&path, 44_100, 2, 100);
        assert!(!is_recognizer_ready(&path));
    }

    #[test]
    fn garbage_is_not_a_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fake.wav");
        std::fs::write(&path, b"not really audio").unwrap();
        assert!(inspect_wav(&path).is_none());
        assert!(!is_recognizer_ready(&path));
    }

    #[test]
    fn missing_decoder_is_reported() {
        let err = convert(
            Path::new("memo.mp3"),
            AudioFormat::Mp3,
            None,
            Duration::from_secs(1),
        )
        .unwrap_err();
        match err {
            SttError::DecoderMissing { format, decoder, .. } => {
                assert_eq!(format, "mp3");
                assert_eq!(decoder, "ffmpeg");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_input_is_not_transient() {
        let err = check_readable(Path::new("/nonexistent/dir/call.wav")).unwrap_err();
        assert!(!err.is_transient());
    }
}
