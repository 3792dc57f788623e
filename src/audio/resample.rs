//! Sample-rate conversion and channel mixing.
//!
//! The live model takes **16 kHz mono** input and answers with **24 kHz
//! mono** audio, while sound cards commonly run at 44.1 or 48 kHz with two
//! channels.  This module bridges both directions:
//!
//! 1. [`downmix_to_mono`]: average interleaved channels into one.
//! 2. [`resample`]: linear-interpolation rate conversion of a whole buffer.
//! 3. [`StreamResampler`]: the same interpolation over a stream delivered in
//!    arbitrary pieces, used on the capture path.

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all channels.
///
/// The output length is `samples.len() / channels`.
///
/// * If `channels == 1` the input slice is returned as an owned `Vec`.
/// * If `channels == 0` an empty vector is returned.
///
/// ```rust
/// use live_relay::audio::downmix_to_mono;
///
/// let stereo = vec![0.5_f32, -0.5, 0.2, -0.2]; // L R L R
/// let mono = downmix_to_mono(&stereo, 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[0] - 0.0).abs() < 1e-6);
/// ```
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `source_rate` Hz to `target_rate` Hz using
/// linear interpolation.
///
/// * Equal rates return the input unchanged.
/// * Empty input or a zero rate returns an empty vector.
///
/// The output length is `ceil(samples.len() * target_rate / source_rate)`.
///
/// ```rust
/// use live_relay::audio::resample;
///
/// // 48 kHz → 16 kHz (ratio = 1/3)
/// let hi = vec![0.5_f32; 480];
/// assert_eq!(resample(&hi, 48_000, 16_000).len(), 160);
///
/// // 24 kHz → 48 kHz (ratio = 2)
/// let lo = vec![0.5_f32; 240];
/// assert_eq!(resample(&lo, 24_000, 48_000).len(), 480);
/// ```
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = (src_pos - idx as f64) as f32;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// StreamResampler
// ---------------------------------------------------------------------------

/// Linear resampler that carries its read position and the last input
/// sample from one buffer to the next.
///
/// Splitting a signal into buffers of any size yields exactly the samples a
/// single pass over the whole signal would, so the output rate matches
/// `target_rate` over time instead of gaining a sample per buffer.
///
/// ```rust
/// use live_relay::audio::StreamResampler;
///
/// let mut rs = StreamResampler::new(44_100, 16_000);
/// let total: usize = (0..100).map(|_| rs.process(&[0.0; 441]).len()).sum();
/// assert!(total.abs_diff(16_000) <= 1);
/// ```
#[derive(Debug, Clone)]
pub struct StreamResampler {
    source_rate: u32,
    target_rate: u32,
    /// Source position of the next output sample in units of
    /// `1 / target_rate` input samples, relative to the start of the next
    /// buffer.  `-target_rate` addresses `last`.
    pos: i64,
    last: Option<f32>,
}

impl StreamResampler {
    pub fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            source_rate,
            target_rate,
            pos: 0,
            last: None,
        }
    }

    /// Resample the next piece of the stream.
    ///
    /// An output sample is produced once both of its neighbours have
    /// arrived, so the final input sample of a buffer may only be used by
    /// the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.source_rate == self.target_rate {
            return samples.to_vec();
        }
        if samples.is_empty() || self.source_rate == 0 || self.target_rate == 0 {
            return Vec::new();
        }

        let target = i64::from(self.target_rate);
        let step = i64::from(self.source_rate);
        let len = samples.len() as i64;
        // Only read while `pos` is negative, which needs a previous buffer.
        let last = self.last.unwrap_or(0.0);

        let mut output = Vec::with_capacity((len * target / step) as usize + 1);
        let mut pos = self.pos;
        loop {
            let idx = pos.div_euclid(target);
            if idx + 1 >= len {
                break;
            }
            let frac = (pos.rem_euclid(target) as f64 / target as f64) as f32;
            let a = if idx < 0 { last } else { samples[idx as usize] };
            let b = samples[(idx + 1) as usize];
            output.push(a * (1.0 - frac) + b * frac);
            pos += step;
        }

        self.pos = pos - len * target;
        self.last = samples.last().copied();
        output
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
