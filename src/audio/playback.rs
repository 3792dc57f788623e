//! Gapless playback scheduling.
//!
//! [`PlaybackScheduler`] keeps a virtual timeline of assistant audio on the
//! output clock.  Chunks arrive from the network in bursts; each one is
//! scheduled to start exactly where the previous one ends, or "now" when the
//! timeline has fallen behind the clock.
//!
//! ```text
//!   clock.now()          next_playback_time
//!        │                      │
//!   ─────┼──[unit 1][unit 2][unit 3]──────▶ output frames
//! ```
//!
//! Time is counted in frames at the output rate, so durations add up
//! exactly and there is no floating-point drift between units.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::codec::{AudioChunk, CodecError};
use super::resample::resample;

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Identifier of a scheduled unit; also the handle used to cancel it.
pub type UnitId = u64;

/// Sink for scheduled audio, driven by a real-time clock.
///
/// [`CpalOutput`](super::output::CpalOutput) is the production
/// implementation; tests use a manual clock.
pub trait AudioOutput {
    /// Frames played since the output started.
    fn now(&self) -> u64;

    /// Frame rate of the output clock in Hz.
    fn sample_rate(&self) -> u32;

    /// Play mono `samples` starting at output frame `at`.
    fn start(&mut self, id: UnitId, samples: Arc<[f32]>, at: u64);

    /// Stop and discard a unit, whether it is still pending or playing.
    fn stop(&mut self, id: UnitId);
}

// ---------------------------------------------------------------------------
// PlaybackUnit
// ---------------------------------------------------------------------------

/// A decoded chunk placed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackUnit {
    pub id: UnitId,
    /// First output frame of the unit.
    pub start: u64,
    /// Length in output frames.
    pub frames: u64,
}

impl PlaybackUnit {
    /// Output frame right after the last sample.
    pub fn end(&self) -> u64 {
        self.start + self.frames
    }
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// Owns the output, the `next_playback_time` cursor and the live unit set.
pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_playback_time: u64,
    live: BTreeMap<UnitId, PlaybackUnit>,
    next_id: UnitId,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let now = output.now();
        Self {
            output,
            next_playback_time: now,
            live: BTreeMap::new(),
            next_id: 0,
        }
    }

    /// Decode `chunk` and schedule it right after everything already queued.
    ///
    /// Chunks whose rate differs from the output rate are resampled first.
    /// Empty chunks are accepted and schedule nothing.
    ///
    /// # Errors
    ///
    /// [`CodecError::InvalidAudioFormat`] when the payload is not PCM16.
    pub fn enqueue(&mut self, chunk: &AudioChunk) -> Result<Option<PlaybackUnit>, CodecError> {
        let decoded = chunk.decode()?;
        let out_rate = self.output.sample_rate();
        let samples = if chunk.sample_rate() == out_rate {
            decoded
        } else {
            resample(&decoded, chunk.sample_rate(), out_rate)
        };
        if samples.is_empty() {
            return Ok(None);
        }

        let start = self.next_playback_time.max(self.output.now());
        let unit = PlaybackUnit {
            id: self.next_id,
            start,
            frames: samples.len() as u64,
        };
        self.next_id += 1;

        self.output.start(unit.id, samples.into(), start);
        self.next_playback_time = unit.end();
        self.live.insert(unit.id, unit);

        log::trace!(
            "playback: unit {} scheduled at frame {} ({} frames, {} live)",
            unit.id,
            unit.start,
            unit.frames,
            self.live.len()
        );
        Ok(Some(unit))
    }

    /// `true` while any live unit has not reached its end on the clock.
    pub fn is_speaking(&self) -> bool {
        let now = self.output.now();
        self.live.values().any(|unit| unit.end() > now)
    }

    /// Drop units that finished playing naturally.  Returns how many.
    pub fn reap(&mut self) -> usize {
        let now = self.output.now();
        let before = self.live.len();
        self.live.retain(|_, unit| unit.end() > now);
        before - self.live.len()
    }

    /// Barge-in: stop every scheduled or playing unit and rewind the cursor
    /// to the clock.
    pub fn interrupt(&mut self) {
        let cancelled = self.live.len();
        for id in std::mem::take(&mut self.live).into_keys() {
            self.output.stop(id);
        }
        self.next_playback_time = self.output.now();
        if cancelled > 0 {
            log::debug!("playback: interrupted, {cancelled} unit(s) cancelled");
        }
    }

    pub fn next_playback_time(&self) -> u64 {
        self.next_playback_time
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::testing::ManualOutput;
    use super::*;

    /// 100 ms of 24 kHz audio.
    fn chunk_100ms() -> AudioChunk {
        AudioChunk::from_samples(&[0.1; 2_400], 24_000)
    }

    fn scheduler() -> (PlaybackScheduler, ManualOutput) {
        let output = ManualOutput::new(24_000);
        (PlaybackScheduler::new(Box::new(output.clone())), output)
    }

    #[test]
    fn back_to_back_chunks_are_contiguous() {
        let (mut sched, _out) = scheduler();
        let units: Vec<PlaybackUnit> = (0..5)
            .map(|_| sched.enqueue(&chunk_100ms()).unwrap().unwrap())
            .collect();

        for pair in units.windows(2) {
            assert_eq!(pair[1].start, pair[0].start + pair[0].frames);
        }
        assert_eq!(sched.next_playback_time(), 5 * 2_400);
    }

    #[test]
    fn mixed_length_chunks_are_contiguous() {
        let (mut sched, _out) = scheduler();
        let units: Vec<PlaybackUnit> = [2_400, 1_000, 7, 4_800, 1]
            .iter()
            .map(|&n| {
                let chunk = AudioChunk::from_samples(&vec![0.1; n], 24_000);
                sched.enqueue(&chunk).unwrap().unwrap()
            })
            .collect();

        for pair in units.windows(2) {
            assert_eq!(pair[1].start, pair[0].start + pair[0].frames);
        }
        assert_eq!(sched.next_playback_time(), 2_400 + 1_000 + 7 + 4_800 + 1);
    }

    #[test]
    fn resampled_chunks_are_contiguous() {
        // 16 kHz chunks on a 24 kHz output: durations are counted after
        // conversion.
        let (mut sched, _out) = scheduler();
        let units: Vec<PlaybackUnit> = [160, 333, 1_600]
            .iter()
            .map(|&n| {
                let chunk = AudioChunk::from_samples(&vec![0.1; n], 16_000);
                sched.enqueue(&chunk).unwrap().unwrap()
            })
            .collect();

        assert_eq!(
            units.iter().map(|u| u.frames).collect::<Vec<_>>(),
            vec![240, 500, 2_400]
        );
        for pair in units.windows(2) {
            assert_eq!(pair[1].start, pair[0].start + pair[0].frames);
        }
        assert_eq!(sched.next_playback_time(), 240 + 500 + 2_400);
    }

    #[test]
    fn late_chunk_resyncs_to_now() {
        let (mut sched, out) = scheduler();
        sched.enqueue(&chunk_100ms()).unwrap();

        // Network gap: clock runs past the end of the queued audio.
        out.advance(10_000);
        let unit = sched.enqueue(&chunk_100ms()).unwrap().unwrap();

        assert_eq!(unit.start, 10_000);
        assert_eq!(sched.next_playback_time(), 12_400);
    }

    #[test]
    fn start_never_precedes_clock() {
        let (mut sched, out) = scheduler();
        out.advance(777);
        let unit = sched.enqueue(&chunk_100ms()).unwrap().unwrap();
        assert!(unit.start >= out.clock.get());
    }

    #[test]
    fn output_receives_samples_at_scheduled_frame() {
        let (mut sched, out) = scheduler();
        sched.enqueue(&chunk_100ms()).unwrap();
        sched.enqueue(&chunk_100ms()).unwrap();
        assert_eq!(
            *out.started.borrow(),
            vec![(0, 0, 2_400), (1, 2_400, 2_400)]
        );
    }

    #[test]
    fn speaking_until_three_chunks_elapse() {
        let (mut sched, out) = scheduler();
        for _ in 0..3 {
            sched.enqueue(&chunk_100ms()).unwrap();
        }
        assert!(sched.is_speaking());

        out.advance(7_199); // 299.96 ms
        assert!(sched.is_speaking());

        out.advance(1); // exactly 300 ms
        assert!(!sched.is_speaking());
        assert_eq!(sched.reap(), 3);
        assert_eq!(sched.live_count(), 0);
    }

    #[test]
    fn reap_only_removes_finished_units() {
        let (mut sched, out) = scheduler();
        sched.enqueue(&chunk_100ms()).unwrap();
        sched.enqueue(&chunk_100ms()).unwrap();

        out.advance(2_400);
        assert_eq!(sched.reap(), 1);
        assert_eq!(sched.live_count(), 1);
        assert!(sched.is_speaking());
    }

    #[test]
    fn interrupt_stops_everything_and_rewinds() {
        let (mut sched, out) = scheduler();
        for _ in 0..3 {
            sched.enqueue(&chunk_100ms()).unwrap();
        }
        out.advance(1_000);

        sched.interrupt();

        assert_eq!(sched.live_count(), 0);
        assert!(!sched.is_speaking());
        assert_eq!(sched.next_playback_time(), 1_000);
        assert_eq!(*out.stopped.borrow(), vec![0, 1, 2]);

        let unit = sched.enqueue(&chunk_100ms()).unwrap().unwrap();
        assert_eq!(unit.start, 1_000);
    }

    #[test]
    fn other_rates_are_resampled_to_output_rate() {
        let output = ManualOutput::new(48_000);
        let mut sched = PlaybackScheduler::new(Box::new(output.clone()));
        let unit = sched.enqueue(&chunk_100ms()).unwrap().unwrap();
        assert_eq!(unit.frames, 4_800);
    }

    #[test]
    fn odd_length_chunk_is_rejected() {
        let (mut sched, out) = scheduler();
        let bad = AudioChunk::from_pcm16(vec![0, 1, 2], 24_000);
        assert!(sched.enqueue(&bad).is_err());
        assert_eq!(sched.live_count(), 0);
        assert!(out.started.borrow().is_empty());
    }

    #[test]
    fn empty_chunk_schedules_nothing() {
        let (mut sched, _out) = scheduler();
        let empty = AudioChunk::from_pcm16(Vec::new(), 24_000);
        assert_eq!(sched.enqueue(&empty).unwrap(), None);
        assert!(!sched.is_speaking());
    }
}
