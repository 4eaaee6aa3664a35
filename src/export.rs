//! Transcript writers: plain text and SRT (SubRip) subtitles.

use crate::transcription::Segment;
use std::path::Path;

/// Format seconds as an SRT timestamp, `HH:MM:SS,mmm`.
///
/// Rounds to the nearest millisecond. Negative or non-finite input clamps to zero.
pub fn format_timestamp(seconds: f64) -> String {
    let ms = if seconds.is_finite() && seconds > 0.0 {
        (seconds * 1000.0).round() as u64
    } else {
        0
    };
    let hours = ms / 3_600_000;
    let mins = (ms % 3_600_000) / 60_000;
    let secs = (ms % 60_000) / 1_000;
    let millis = ms % 1_000;
    format!("{:02}:{:02}:{:02},{:03}", hours, mins, secs, millis)
}

/// Render segments as an SRT document: numbered cues separated by blank lines.
pub fn render_srt(segments: &[Segment]) -> String {
    let mut out = String::new();
    for (i, segment) in segments.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(segment.start),
            format_timestamp(segment.end),
            segment.text.trim()
        ));
    }
    out
}

pub fn write_srt(path: &Path, segments: &[Segment]) -> std::io::Result<()> {
    std::fs::write(path, render_srt(segments))
}

/// Write the transcript text as UTF-8.
pub fn write_text(path: &Path, text: &str) -> std::io::Result<()> {
    std::fs::write(path, text)
}
