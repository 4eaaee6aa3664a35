//! Audio file decoding into 16kHz mono PCM.

use crate::transcription::backend::BackendError;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Sample rate every Whisper model expects.
pub const SAMPLE_RATE: u32 = 16_000;

/// Decode the audio file at `path` into mono `f32` samples at 16kHz.
///
/// ## Errors:
/// - **BackendError::Io**: the file could not be opened
/// - **BackendError::Decode**: the container/codec is unreadable or ffmpeg is missing
pub fn load_pcm(path: &Path) -> Result<Vec<f32>, BackendError> {
    if has_extension(path, "wav") {
        match read_wav(path) {
            Ok(Some(samples)) => return Ok(samples),
            Ok(None) => debug!(path = %path.display(), "WAV is not 16kHz, resampling with ffmpeg"),
            Err(BackendError::Io(e)) => return Err(BackendError::Io(e)),
            Err(e) => debug!(path = %path.display(), error = %e, "WAV reader failed, trying ffmpeg"),
        }
    }
    decode_with_ffmpeg(path)
}

fn has_extension(path: &Path, expected: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(expected))
}

/// Read a WAV file natively. `Ok(None)` means the file needs resampling.
fn read_wav(path: &Path) -> Result<Option<Vec<f32>>, BackendError> {
    let mut file = std::fs::File::open(path)?;
    let (header, data) =
        wav::read(&mut file).map_err(|e| BackendError::Decode(format!("invalid WAV: {}", e)))?;

    if header.sampling_rate != SAMPLE_RATE {
        return Ok(None);
    }

    let interleaved: Vec<f32> = match data {
        wav::BitDepth::Eight(samples) => samples
            .iter()
            .map(|&s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(samples) => samples.iter().map(|&s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(samples) => {
            samples.iter().map(|&s| s as f32 / 8_388_608.0).collect()
        }
        wav::BitDepth::ThirtyTwoFloat(samples) => samples,
        wav::BitDepth::Empty => Vec::new(),
    };

    Ok(Some(downmix(&interleaved, header.channel_count as usize)))
}

/// Average interleaved frames down to one channel.
pub(crate) fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Shell out to ffmpeg, asking for raw signed 16-bit little-endian mono PCM on stdout.
fn decode_with_ffmpeg(path: &Path) -> Result<Vec<f32>, BackendError> {
    let ffmpeg = std::env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string());
    debug!(path = %path.display(), ffmpeg = %ffmpeg, "Decoding audio with ffmpeg");

    let output = Command::new(&ffmpeg)
        .args(["-nostdin", "-threads", "0", "-i"])
        .arg(path)
        .args([
            "-f", "s16le", "-ac", "1", "-acodec", "pcm_s16le", "-ar", "16000", "-",
        ])
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BackendError::Decode(format!(
                "'{}' not found; install ffmpeg to decode non-WAV audio",
                ffmpeg
            )),
            _ => BackendError::Io(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.lines().last().unwrap_or("unknown error").trim();
        return Err(BackendError::Decode(format!("ffmpeg failed: {}", reason)));
    }

    Ok(pcm_s16le_to_f32(&output.stdout))
}

/// Convert raw little-endian 16-bit samples into floats. A trailing odd byte is ignored.
pub(crate) fn pcm_s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    let mut cursor = Cursor::new(bytes);
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, rate: u32, channels: u16, samples: Vec<i16>) {
        let header = wav::Header::new(wav::WAV_FORMAT_PCM, channels, rate, 16);
        let mut file = std::fs::File::create(path).unwrap();
        wav::write(header, &wav::BitDepth::Sixteen(samples), &mut file).unwrap();
    }

    #[test]
    fn test_pcm_conversion() {
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80, 0xFF];
        let samples = pcm_s16le_to_f32(&bytes);
        assert_eq!(samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_downmix_stereo() {
        let mono = downmix(&[0.5, -0.5, 1.0, 0.0], 2);
        assert_eq!(mono, vec![0.0, 0.5]);
        assert_eq!(downmix(&[0.25, 0.75], 1), vec![0.25, 0.75]);
    }

    #[test]
    fn test_reads_16khz_wav_natively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("speech.WAV");
        write_wav(&path, SAMPLE_RATE, 2, vec![16384, 0, -16384, -16384]);

        let samples = load_pcm(&path).unwrap();
        assert_eq!(samples, vec![0.25, -0.5]);
    }

    #[test]
    fn test_other_rates_need_resampling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("music.wav");
        write_wav(&path, 44_100, 1, vec![0; 64]);

        assert!(read_wav(&path).unwrap().is_none());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_pcm(Path::new("/definitely/not/here.wav")).unwrap_err();
        assert!(matches!(err, BackendError::Io(_)));
    }
}
