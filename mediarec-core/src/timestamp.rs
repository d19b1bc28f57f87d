//! Recording timeline normalization
//!
//! Every source arrives with its own clock. Video uses capture timestamps and
//! is rebased on the first encoded frame; audio timestamps are derived from
//! the number of frames emitted so far, never from wall clock.

/// Video epoch: the first encoded video pts becomes zero
#[derive(Debug, Clone, Copy, Default)]
pub struct VideoEpoch {
    epoch_us: Option<u64>,
}

impl VideoEpoch {
    /// Create an unset epoch
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebase a raw pts; the first call fixes the epoch.
    ///
    /// Timestamps before the epoch saturate to zero.
    pub fn normalize(&mut self, raw_pts_us: u64) -> u64 {
        let epoch = *self.epoch_us.get_or_insert(raw_pts_us);
        raw_pts_us.saturating_sub(epoch)
    }

    /// The epoch, once fixed
    pub fn epoch(&self) -> Option<u64> {
        self.epoch_us
    }
}

/// Sample-count clock for audio
#[derive(Debug, Clone, Copy)]
pub struct SampleClock {
    sample_rate: u32,
    frames: u64,
}

impl SampleClock {
    /// Create a clock at zero
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames: 0,
        }
    }

    /// Sample rate of the clock
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Frames counted so far
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Current time in microseconds
    pub fn now_us(&self) -> u64 {
        frames_to_micros(self.frames, self.sample_rate)
    }

    /// Return the pts of the next chunk and count its frames
    pub fn advance(&mut self, frames: u64) -> u64 {
        let pts = self.now_us();
        self.frames += frames;
        pts
    }
}

/// Convert a frame count to microseconds.
///
/// Computed from the cumulative count every time so rounding never drifts.
pub fn frames_to_micros(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (frames as u128 * 1_000_000 / sample_rate as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_video_epoch_rebases_on_first_sample() {
        let mut epoch = VideoEpoch::new();
        assert_eq!(epoch.normalize(5_000_000), 0);
        assert_eq!(epoch.normalize(5_033_333), 33_333);
        assert_eq!(epoch.epoch(), Some(5_000_000));
        // Earlier than the epoch
        assert_eq!(epoch.normalize(4_000_000), 0);
    }

    #[test]
    fn test_sample_clock_has_no_drift() {
        let mut clock = SampleClock::new(44_100);
        let mut last = 0;
        for _ in 0..1000 {
            last = clock.advance(441);
        }
        assert_eq!(last, 999 * 441 * 1_000_000 / 44_100);
        assert_eq!(clock.now_us(), 10_000_000);
    }

    #[test]
    fn test_zero_rate() {
        assert_eq!(frames_to_micros(100, 0), 0);
    }
}
