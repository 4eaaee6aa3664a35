//! Slaney-style mel filter bank, matching the filters Whisper was trained with.

/// Window size of the STFT Whisper uses.
pub const N_FFT: usize = 400;

/// Build a `n_mels x (N_FFT / 2 + 1)` row-major filter bank for `sample_rate`.
///
/// ## Layout:
/// Row `m` holds the weights of mel band `m` over the FFT bins, the layout
/// `candle_transformers::models::whisper::audio::pcm_to_mel` expects.
pub fn mel_filter_bank(sample_rate: u32, n_mels: usize) -> Vec<f32> {
    let n_bins = N_FFT / 2 + 1;
    let nyquist = sample_rate as f64 / 2.0;

    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * nyquist / (n_bins - 1) as f64)
        .collect();

    let mel_max = hz_to_mel(nyquist);
    let band_edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_bins];
    for m in 0..n_mels {
        let (lower, center, upper) = (band_edges[m], band_edges[m + 1], band_edges[m + 2]);
        // Slaney normalization: constant energy per band
        let enorm = 2.0 / (upper - lower);
        for (k, &freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[m * n_bins + k] = (weight * enorm) as f32;
        }
    }
    filters
}

const F_SP: f64 = 200.0 / 3.0;
const MIN_LOG_HZ: f64 = 1000.0;
const MIN_LOG_MEL: f64 = MIN_LOG_HZ / F_SP;

fn log_step() -> f64 {
    6.4f64.ln() / 27.0
}

fn hz_to_mel(hz: f64) -> f64 {
    if hz >= MIN_LOG_HZ {
        MIN_LOG_MEL + (hz / MIN_LOG_HZ).ln() / log_step()
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    if mel >= MIN_LOG_MEL {
        MIN_LOG_HZ * (log_step() * (mel - MIN_LOG_MEL)).exp()
    } else {
        mel * F_SP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_round_trips() {
        for hz in [0.0, 440.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_filter_bank_shape() {
        for n_mels in [80, 128] {
            let filters = mel_filter_bank(16_000, n_mels);
            assert_eq!(filters.len(), n_mels * (N_FFT / 2 + 1));
            assert!(filters.iter().all(|w| *w >= 0.0));

            // Every band picks up at least one FFT bin
            for band in filters.chunks(N_FFT / 2 + 1) {
                assert!(band.iter().any(|w| *w > 0.0));
            }
        }
    }
}
