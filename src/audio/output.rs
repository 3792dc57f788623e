//! Speaker output via `cpal`.
//!
//! [`CpalOutput`] opens the default output device and mixes every scheduled
//! unit into the device buffer from the cpal callback.  The number of frames
//! written so far is the output clock the [`PlaybackScheduler`] schedules
//! against.
//!
//! [`PlaybackScheduler`]: super::PlaybackScheduler

use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use super::capture::CaptureError;
use super::playback::{AudioOutput, UnitId};

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct ScheduledSamples {
    id: UnitId,
    start: u64,
    samples: Arc<[f32]>,
}

impl ScheduledSamples {
    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Timeline shared between the scheduler and the audio thread.
#[derive(Default)]
struct Mixer {
    /// Frames written to the device so far.
    position: u64,
    units: Vec<ScheduledSamples>,
}

impl Mixer {
    /// Fill one interleaved device buffer and advance the clock.
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let frames = out.len() / channels;

        for (i, frame) in out.chunks_exact_mut(channels).enumerate() {
            let at = self.position + i as u64;
            let mut value = 0.0_f32;
            for unit in &self.units {
                if at >= unit.start && at < unit.end() {
                    value += unit.samples[(at - unit.start) as usize];
                }
            }
            frame.fill(value.clamp(-1.0, 1.0));
        }

        self.position += frames as u64;
        let position = self.position;
        self.units.retain(|unit| unit.end() > position);
    }
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// CpalOutput
// ---------------------------------------------------------------------------

/// Default output device.  Dropping it stops the stream.
pub struct CpalOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    _stream: cpal::Stream,
}

impl CpalOutput {
    /// Open the default output device with its preferred configuration and
    /// start playing silence.
    ///
    /// # Errors
    ///
    /// [`CaptureError`] variants when no device exists or the platform
    /// rejects the stream.
    pub fn open() -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(CaptureError::NoDevice)?;

        let supported = device.default_output_config()?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config: cpal::StreamConfig = supported.into();

        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let callback_mixer = Arc::clone(&mixer);

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                lock(&callback_mixer).render(data, channels);
            },
            |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
            },
            None,
        )?;
        stream.play()?;

        log::info!("Audio output started ({sample_rate} Hz, {channels} ch)");

        Ok(Self {
            mixer,
            sample_rate,
            _stream: stream,
        })
    }
}

impl AudioOutput for CpalOutput {
    fn now(&self) -> u64 {
        lock(&self.mixer).position
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn start(&mut self, id: UnitId, samples: Arc<[f32]>, at: u64) {
        lock(&self.mixer).units.push(ScheduledSamples {
            id,
            start: at,
            samples,
        });
    }

    fn stop(&mut self, id: UnitId) {
        lock(&self.mixer).units.retain(|unit| unit.id != id);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: UnitId, start: u64, samples: &[f32]) -> ScheduledSamples {
        ScheduledSamples {
            id,
            start,
            samples: samples.to_vec().into(),
        }
    }

    #[test]
    fn render_advances_clock_by_frames() {
        let mut mixer = Mixer::default();
        let mut buf = vec![0.0_f32; 8];
        mixer.render(&mut buf, 2);
        assert_eq!(mixer.position, 4);
    }

    #[test]
    fn render_places_unit_at_its_start_frame() {
        let mut mixer = Mixer::default();
        mixer.units.push(unit(0, 2, &[0.5, 0.25]));

        let mut buf = vec![9.0_f32; 4];
        mixer.render(&mut buf, 1);

        assert_eq!(buf, vec![0.0, 0.0, 0.5, 0.25]);
        assert!(mixer.units.is_empty(), "finished unit must be dropped");
    }

    #[test]
    fn render_duplicates_mono_across_channels() {
        let mut mixer = Mixer::default();
        mixer.units.push(unit(0, 0, &[0.5]));

        let mut buf = vec![0.0_f32; 2];
        mixer.render(&mut buf, 2);

        assert_eq!(buf, vec![0.5, 0.5]);
    }

    #[test]
    fn render_keeps_unfinished_units() {
        let mut mixer = Mixer::default();
        mixer.units.push(unit(0, 0, &[0.1; 10]));

        let mut buf = vec![0.0_f32; 4];
        mixer.render(&mut buf, 1);

        assert_eq!(mixer.units.len(), 1);
    }

    #[test]
    fn render_clamps_overlapping_units() {
        let mut mixer = Mixer::default();
        mixer.units.push(unit(0, 0, &[0.8]));
        mixer.units.push(unit(1, 0, &[0.8]));

        let mut buf = vec![0.0_f32; 1];
        mixer.render(&mut buf, 1);

        assert_eq!(buf, vec![1.0]);
    }
}
