//! Timestamped transcript segments.
//!
//! Both recognizers can write SubRip (`.srt`) files, so segment timing is
//! read from one format:
//!
//! ```text
//! 1
//! 00:00:00,000 --> 00:00:02,480
//! Hello, this is the fraud department.
//! ```

use serde::{Deserialize, Serialize};

/// A stretch of recognized speech, in seconds from the start of the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// Parse SubRip cues. Malformed cues and cues without text are skipped.
pub fn parse_srt(input: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut lines = input.lines().map(|l| l.trim_start_matches('\u{feff}').trim());

    while let Some(line) = lines.next() {
        let Some((from, to)) = line.split_once("-->") else {
            continue;
        };
        let (Some(start), Some(end)) = (parse_timestamp(from), parse_timestamp(to)) else {
            continue;
        };
        let mut text = Vec::new();
        for line in lines.by_ref() {
            if line.is_empty() {
                break;
            }
            text.push(line);
        }
        let text = text.join(" ");
        if !text.is_empty() {
            segments.push(Segment { start, end, text });
        }
    }
    segments
}

/// `HH:MM:SS,mmm` (or with `.`) to seconds.
fn parse_timestamp(raw: &str) -> Option<f64> {
    // Position hints like "X1:40" may follow the end time.
    let raw = raw.split_whitespace().next()?;
    let (clock, fraction) = raw
        .split_once(|c: char| c == ',' || c == '.')
        .unwrap_or((raw, "0"));
    let mut parts = clock.split(':').map(|p| p.parse::<u64>().ok());
    let (hours, minutes, seconds) = match (parts.next()?, parts.next()?, parts.next()) {
        (Some(h), Some(m), Some(Some(s))) => (h, m, s),
        (Some(m), Some(s), None) => (0, m, s),
        _ => return None,
    };
    let millis: String = fraction.chars().chain(std::iter::repeat('0')).take(3).collect();
    let millis: u64 = millis.parse().ok()?;
    let total_ms = (hours * 3600 + minutes * 60 + seconds) * 1000 + millis;
    Some(total_ms as f64 / 1000.0)
}

/// Segment texts joined with single spaces.
pub fn join_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .flat_map(|s| s.text.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}
