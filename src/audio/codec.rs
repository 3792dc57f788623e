//! PCM wire codec.
//!
//! The live channel carries audio as signed 16-bit little-endian PCM, base64
//! encoded inside JSON.  Capture and playback work in `f32` samples in
//! `[-1.0, 1.0]`.  [`encode_for_wire`] and [`decode_from_wire`] convert
//! between the two; [`AudioChunk`] carries the bytes together with their
//! format.

use base64::prelude::*;
use thiserror::Error;

/// Scale between `f32` samples and the `i16` domain.
const I16_SCALE: f32 = 32_768.0;

// ---------------------------------------------------------------------------
// CodecError
// ---------------------------------------------------------------------------

/// Errors raised when a byte buffer does not hold valid wire audio.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The buffer cannot be PCM16 (odd length) or the base64 was malformed.
    #[error("invalid audio format: {0}")]
    InvalidAudioFormat(String),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Sample encoding of an [`AudioChunk`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Signed 16-bit little-endian PCM.
    Pcm16Le,
}

// ---------------------------------------------------------------------------
// encode / decode
// ---------------------------------------------------------------------------

/// Convert `f32` samples to PCM16 little-endian bytes.
///
/// Each sample is clamped to `[-1.0, 1.0]`, scaled by 32 768, saturated to
/// the `i16` range and truncated toward zero.  The conversion is lossy but
/// deterministic.
///
/// ```rust
/// use live_relay::audio::encode_for_wire;
///
/// let bytes = encode_for_wire(&[0.0, 1.0, -1.0]);
/// assert_eq!(bytes, vec![0x00, 0x00, 0xff, 0x7f, 0x00, 0x80]);
/// ```
pub fn encode_for_wire(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let scaled = (s.clamp(-1.0, 1.0) * I16_SCALE).clamp(i16::MIN as f32, i16::MAX as f32);
        out.extend_from_slice(&(scaled as i16).to_le_bytes());
    }
    out
}

/// Convert PCM16 little-endian bytes back to `f32` samples (`i16 / 32768`).
///
/// # Errors
///
/// Returns [`CodecError::InvalidAudioFormat`] for odd-length buffers instead
/// of silently dropping the trailing byte.
pub fn decode_from_wire(bytes: &[u8]) -> Result<Vec<f32>, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::InvalidAudioFormat(format!(
            "PCM16 payload has odd length {}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / I16_SCALE)
        .collect())
}

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// One buffer of wire audio plus its format.
///
/// Produced by the capture loop (outbound, 16 kHz) or by the live channel
/// (inbound, 24 kHz).  Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    data: Vec<u8>,
    sample_rate: u32,
    channels: u16,
    encoding: Encoding,
}

impl AudioChunk {
    /// Wrap raw PCM16 bytes received from the wire.
    pub fn from_pcm16(data: Vec<u8>, sample_rate: u32) -> Self {
        Self {
            data,
            sample_rate,
            channels: 1,
            encoding: Encoding::Pcm16Le,
        }
    }

    /// Encode mono `f32` samples into a chunk.
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        Self::from_pcm16(encode_for_wire(samples), sample_rate)
    }

    /// Decode a base64 payload as it appears in `inlineData.data`.
    pub fn from_base64(data: &str, sample_rate: u32) -> Result<Self, CodecError> {
        let bytes = BASE64_STANDARD
            .decode(data)
            .map_err(|e| CodecError::InvalidAudioFormat(format!("bad base64: {e}")))?;
        Ok(Self::from_pcm16(bytes, sample_rate))
    }

    /// Decode to `f32` samples.
    pub fn decode(&self) -> Result<Vec<f32>, CodecError> {
        decode_from_wire(&self.data)
    }

    /// Base64 transport encoding of the payload.
    pub fn to_base64(&self) -> String {
        BASE64_STANDARD.encode(&self.data)
    }

    /// MIME type announced on the wire, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("audio/pcm;rate={}", self.sample_rate)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Number of sample frames in the payload.
    pub fn frames(&self) -> usize {
        self.data.len() / 2 / self.channels.max(1) as usize
    }

    /// Playback length in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }
}

/// Parse the `rate=` parameter out of a MIME type such as
/// `audio/pcm;rate=24000`.
pub fn rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = encode_for_wire(&[2.0, -3.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }

    #[test]
    fn encode_is_little_endian() {
        // 0.5 * 32768 = 16384 = 0x4000
        assert_eq!(encode_for_wire(&[0.5]), vec![0x00, 0x40]);
    }

    #[test]
    fn encode_truncates_toward_zero() {
        // 1.5 / 32768 scales to 1.5 → 1; the negative side to -1.
        let tiny = 1.5 / 32_768.0;
        let bytes = encode_for_wire(&[tiny, -tiny]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 1);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -1);
    }

    #[test]
    fn decode_scales_by_32768() {
        let samples = decode_from_wire(&[0x00, 0x80, 0x00, 0x40, 0x00, 0x00]).unwrap();
        assert_eq!(samples, vec![-1.0, 0.5, 0.0]);
    }

    #[test]
    fn decode_rejects_odd_length() {
        let err = decode_from_wire(&[0x00, 0x01, 0x02]).unwrap_err();
        assert!(matches!(err, CodecError::InvalidAudioFormat(_)));
    }

    #[test]
    fn decode_then_encode_reproduces_bytes() {
        let bytes: Vec<u8> = (0..=255u8).chain(0..=255u8).collect();
        let samples = decode_from_wire(&bytes).unwrap();
        let first = encode_for_wire(&samples);
        let second = encode_for_wire(&samples);
        assert_eq!(first, bytes);
        assert_eq!(first, second);
    }

    #[test]
    fn chunk_metadata() {
        let chunk = AudioChunk::from_samples(&[0.0; 256], 16_000);
        assert_eq!(chunk.bytes().len(), 512);
        assert_eq!(chunk.frames(), 256);
        assert_eq!(chunk.channels(), 1);
        assert_eq!(chunk.encoding(), Encoding::Pcm16Le);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
        assert!((chunk.duration_secs() - 0.016).abs() < 1e-9);
    }

    #[test]
    fn chunk_base64_transport() {
        let chunk = AudioChunk::from_samples(&[0.25, -0.25], 24_000);
        let restored = AudioChunk::from_base64(&chunk.to_base64(), 24_000).unwrap();
        assert_eq!(restored, chunk);
    }

    #[test]
    fn chunk_rejects_bad_base64() {
        assert!(AudioChunk::from_base64("not base64!", 24_000).is_err());
    }

    #[test]
    fn rate_is_parsed_from_mime() {
        assert_eq!(rate_from_mime("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(rate_from_mime("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(rate_from_mime("audio/pcm"), None);
    }
}
