//! Microphone capture.
//!
//! [`CaptureLoop`] owns the input device for the lifetime of a recording.
//! While it is active the device delivers fixed-size 16 kHz mono frames; each
//! frame is encoded to PCM16 and forwarded to the live session **only while
//! the [`RecordingFlag`] is set**.  The flag is re-checked for every frame, so
//! callbacks already in flight stop forwarding as soon as recording stops.
//!
//! [`CpalInput`] is the production [`InputDevice`]: it opens the system
//! default input at its native configuration and converts on the audio
//! thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::mpsc;

use super::codec::AudioChunk;
use super::resample::{downmix_to_mono, StreamResampler};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while acquiring an audio device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no audio device found on the default audio host")]
    NoDevice,

    #[error("failed to query default stream config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

// ---------------------------------------------------------------------------
// RecordingFlag
// ---------------------------------------------------------------------------

/// Shared on/off switch read by the frame callback on every frame.
#[derive(Debug, Clone, Default)]
pub struct RecordingFlag(Arc<AtomicBool>);

impl RecordingFlag {
    pub fn is_recording(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn set(&self, on: bool) {
        self.0.store(on, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// InputDevice
// ---------------------------------------------------------------------------

/// Called once per complete frame of 16 kHz mono samples.
pub type FrameCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Keeps an opened device alive; dropping it releases the device.
pub trait ActiveInput {}

/// A source of fixed-size mono frames at the wire input rate.
pub trait InputDevice {
    /// Acquire the device and start delivering frames to `on_frame`.
    fn open(&mut self, on_frame: FrameCallback) -> Result<Box<dyn ActiveInput>, CaptureError>;
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

/// Re-slices arbitrary device buffers into frames of exactly `frame_size`
/// samples.
pub struct FrameAssembler {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Append `samples` and emit every complete frame in order.
    pub fn push(&mut self, samples: &[f32], mut emit: impl FnMut(&[f32])) {
        self.pending.extend_from_slice(samples);
        let complete = self.pending.len() / self.frame_size * self.frame_size;
        for frame in self.pending[..complete].chunks_exact(self.frame_size) {
            emit(frame);
        }
        self.pending.drain(..complete);
    }

    /// Samples waiting for the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

// ---------------------------------------------------------------------------
// CpalInput
// ---------------------------------------------------------------------------

/// RAII guard that keeps the cpal input stream alive.
struct StreamHandle {
    _stream: cpal::Stream,
}

impl ActiveInput for StreamHandle {}

/// System default microphone via `cpal`.
///
/// The device is looked up on every [`open`](InputDevice::open), so a
/// microphone plugged in after startup is picked up on the next recording.
pub struct CpalInput {
    target_rate: u32,
    frame_size: usize,
}

impl CpalInput {
    pub fn new(target_rate: u32, frame_size: usize) -> Self {
        Self {
            target_rate,
            frame_size,
        }
    }
}

impl InputDevice for CpalInput {
    fn open(&mut self, mut on_frame: FrameCallback) -> Result<Box<dyn ActiveInput>, CaptureError> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or(CaptureError::NoDevice)?;

        let supported = device.default_input_config()?;
        let channels = supported.channels();
        let native_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let target_rate = self.target_rate;
        let mut resampler = StreamResampler::new(native_rate, target_rate);
        let mut assembler = FrameAssembler::new(self.frame_size);

        let stream = device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix_to_mono(data, channels);
                let converted = resampler.process(&mono);
                assembler.push(&converted, &mut on_frame);
            },
            |err: cpal::StreamError| {
                log::error!("cpal input stream error: {err}");
            },
            None,
        )?;
        stream.play()?;

        log::info!(
            "Audio capture started ({native_rate} Hz, {channels} ch → {target_rate} Hz mono)"
        );
        Ok(Box::new(StreamHandle { _stream: stream }))
    }
}

// ---------------------------------------------------------------------------
// CaptureLoop
// ---------------------------------------------------------------------------

/// Start/stop wrapper around an [`InputDevice`].
///
/// Dropping the loop stops capture, so the device is released on every exit
/// path including process teardown.
pub struct CaptureLoop {
    device: Box<dyn InputDevice>,
    sample_rate: u32,
    recording: RecordingFlag,
    stream: Option<Box<dyn ActiveInput>>,
}

impl CaptureLoop {
    /// `sample_rate` is the rate the device delivers frames at (16 kHz).
    pub fn new(device: Box<dyn InputDevice>, sample_rate: u32) -> Self {
        Self {
            device,
            sample_rate,
            recording: RecordingFlag::default(),
            stream: None,
        }
    }

    /// Acquire the device and forward encoded frames to `tx`.
    ///
    /// Calling this while already active does nothing.
    ///
    /// # Errors
    ///
    /// [`CaptureError`] when the device cannot be acquired; the loop stays
    /// inactive.
    pub fn start(&mut self, tx: mpsc::UnboundedSender<AudioChunk>) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let recording = self.recording.clone();
        let sample_rate = self.sample_rate;
        let on_frame: FrameCallback = Box::new(move |samples: &[f32]| {
            if !recording.is_recording() {
                return;
            }
            // The session may already be gone; nothing to do then.
            let _ = tx.send(AudioChunk::from_samples(samples, sample_rate));
        });

        // Set before opening so the very first frame is not lost.
        self.recording.set(true);
        match self.device.open(on_frame) {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(())
            }
            Err(e) => {
                self.recording.set(false);
                Err(e)
            }
        }
    }

    /// Stop forwarding immediately and release the device.
    pub fn stop(&mut self) {
        self.recording.set(false);
        if self.stream.take().is_some() {
            log::info!("Audio capture stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Handle to the flag the frame callback checks.
    pub fn recording_flag(&self) -> RecordingFlag {
        self.recording.clone()
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use super::*;

    /// Input device that hands its callback to the test instead of a sound
    /// card.
    #[derive(Clone, Default)]
    pub struct FakeInput {
        pub callback: Arc<Mutex<Option<FrameCallback>>>,
        pub opened: Arc<AtomicUsize>,
        pub released: Arc<AtomicUsize>,
        pub fail: bool,
    }

    struct FakeStream {
        released: Arc<AtomicUsize>,
    }

    impl ActiveInput for FakeStream {}

    impl Drop for FakeStream {
        fn drop(&mut self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl FakeInput {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        /// Deliver one frame as the device thread would.
        pub fn deliver(&self, samples: &[f32]) {
            if let Some(cb) = self.callback.lock().unwrap().as_mut() {
                cb(samples);
            }
        }
    }

    impl InputDevice for FakeInput {
        fn open(
            &mut self,
            on_frame: FrameCallback,
        ) -> Result<Box<dyn ActiveInput>, CaptureError> {
            if self.fail {
                return Err(CaptureError::NoDevice);
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            *self.callback.lock().unwrap() = Some(on_frame);
            Ok(Box::new(FakeStream {
                released: Arc::clone(&self.released),
            }))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
