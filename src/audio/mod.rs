//! Audio pipeline: capture → wire codec → playback scheduling.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix/resample → FrameAssembler (256 @ 16 kHz)
//!           → RecordingFlag check → encode_for_wire → AudioChunk (mpsc) → LiveSession
//!
//! LiveSession → AudioChunk (24 kHz) → PlaybackScheduler → AudioOutput → speakers
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use live_relay::audio::{CaptureLoop, CpalInput};
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! let mut capture = CaptureLoop::new(Box::new(CpalInput::new(16_000, 256)), 16_000);
//! capture.start(tx).unwrap(); // dropping `capture` releases the microphone
//!
//! while let Some(chunk) = rx.blocking_recv() {
//!     println!("{} frames, {}", chunk.frames(), chunk.mime_type());
//! }
//! ```

pub mod capture;
pub mod codec;
pub mod output;
pub mod playback;
pub mod resample;

pub use capture::{
    ActiveInput, CaptureError, CaptureLoop, CpalInput, FrameAssembler, FrameCallback,
    InputDevice, RecordingFlag,
};
pub use codec::{decode_from_wire, encode_for_wire, rate_from_mime, AudioChunk, CodecError, Encoding};
pub use output::CpalOutput;
pub use playback::{AudioOutput, PlaybackScheduler, PlaybackUnit, UnitId};
pub use resample::{downmix_to_mono, resample, StreamResampler};
