//! Adaptive segmentation of an epoch into variable-length windows.
//!
//! An epoch's readings are cut into windows whose whole-second durations are
//! drawn at random between a lower and upper bound. Each window is reduced
//! to the per-channel mean of its readings.

use crate::collector::types::ChannelValues;
use rand::Rng;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

/// A contiguous span of an epoch reduced to per-channel means.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// Length of the span in seconds
    pub duration_secs: f64,
    /// Arithmetic mean of each channel over the span
    pub means: ChannelValues,
}

/// Splits an epoch buffer into windows.
#[derive(Debug, Clone)]
pub struct WindowSegmenter {
    samples_per_second: usize,
    min_window_secs: u32,
    max_window_secs: u32,
}

impl WindowSegmenter {
    /// Create a segmenter. A `max_window_secs` below the minimum is raised to
    /// it and a zero minimum is treated as one second.
    pub fn new(samples_per_second: usize, min_window_secs: u32, max_window_secs: u32) -> Self {
        let min_window_secs = min_window_secs.max(1);
        Self {
            samples_per_second,
            min_window_secs,
            max_window_secs: max_window_secs.max(min_window_secs),
        }
    }

    pub fn samples_per_second(&self) -> usize {
        self.samples_per_second
    }

    /// Number of whole seconds covered by `len` readings.
    pub fn whole_seconds(&self, len: usize) -> u32 {
        if self.samples_per_second == 0 {
            return 0;
        }
        u32::try_from(len / self.samples_per_second).unwrap_or(u32::MAX)
    }

    /// Segment an epoch into windows, in chronological order.
    ///
    /// Returns an empty vector when the buffer holds less than one second.
    /// Readings past the last whole second are dropped.
    pub fn segment<R: Rng + ?Sized>(&self, buffer: &[ChannelValues], rng: &mut R) -> Vec<Window> {
        let total = self.whole_seconds(buffer.len());
        if total == 0 {
            return Vec::new();
        }

        let durations = generate_durations(total, self.min_window_secs, self.max_window_secs, rng);

        let mut windows = Vec::with_capacity(durations.len());
        let mut offset = 0usize;
        for duration in durations {
            let len = duration as usize * self.samples_per_second;
            let end = offset + len;
            if end > buffer.len() {
                break;
            }
            windows.push(Window {
                duration_secs: f64::from(duration),
                means: channel_means(&buffer[offset..end]),
            });
            offset = end;
        }

        windows
    }
}

/// Draw window durations in whole seconds that sum to exactly `total`.
///
/// Each draw is uniform in `[min, min(max, remaining)]`. A remainder too
/// short for another draw is folded into the last window. A `total` below
/// `min` yields a single window of `total` seconds.
pub fn generate_durations<R: Rng + ?Sized>(total: u32, min: u32, max: u32, rng: &mut R) -> Vec<u32> {
    if total == 0 {
        return Vec::new();
    }
    let min = min.max(1);
    let max = max.max(min);
    if total < min {
        return vec![total];
    }

    let mut durations: Vec<u32> = Vec::new();
    let mut remaining = total;
    while remaining > 0 {
        if remaining < min {
            if let Some(last) = durations.last_mut() {
                *last += remaining;
            } else {
                durations.push(remaining);
            }
            break;
        }
        let upper = max.min(remaining);
        let duration = rng.gen_range(min..=upper);
        durations.push(duration);
        remaining -= duration;
    }

    durations
}

fn channel_means(span: &[ChannelValues]) -> ChannelValues {
    ChannelValues {
        af3: span.iter().map(|v| v.af3).mean(),
        t7: span.iter().map(|v| v.t7).mean(),
        pz: span.iter().map(|v| v.pz).mean(),
        af4: span.iter().map(|v| v.af4).mean(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn constant_buffer(len: usize, value: f64) -> Vec<ChannelValues> {
        vec![ChannelValues::new(value, value, value, value); len]
    }

    #[test]
    fn test_durations_sum_to_total() {
        let mut rng = StdRng::seed_from_u64(7);
        for total in 0..200 {
            let durations = generate_durations(total, 3, 15, &mut rng);
            assert_eq!(durations.iter().sum::<u32>(), total, "total {total}");
        }
    }

    #[test]
    fn test_durations_respect_minimum() {
        let mut rng = StdRng::seed_from_u64(11);
        for total in 3..200 {
            let durations = generate_durations(total, 3, 15, &mut rng);
            assert!(durations.iter().all(|&d| d >= 3), "total {total}: {durations:?}");
        }
    }

    #[test]
    fn test_short_total_is_single_window() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(generate_durations(2, 5, 10, &mut rng), vec![2]);
        assert!(generate_durations(0, 5, 10, &mut rng).is_empty());
    }

    #[test]
    fn test_durations_are_reproducible_with_seed() {
        let a = generate_durations(120, 3, 15, &mut StdRng::seed_from_u64(42));
        let b = generate_durations(120, 3, 15, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_segment_sums_to_whole_seconds() {
        let segmenter = WindowSegmenter::new(8, 2, 5);
        let mut rng = StdRng::seed_from_u64(3);
        for len in [0usize, 7, 8, 15, 16, 63, 200, 1001] {
            let windows = segmenter.segment(&constant_buffer(len, 1.0), &mut rng);
            let total: f64 = windows.iter().map(|w| w.duration_secs).sum();
            assert_eq!(total, (len / 8) as f64, "len {len}");
        }
    }

    #[test]
    fn test_segment_under_one_second_is_empty() {
        let segmenter = WindowSegmenter::new(128, 3, 15);
        let windows = segmenter.segment(&constant_buffer(127, 1.0), &mut StdRng::seed_from_u64(1));
        assert!(windows.is_empty());
    }

    #[test]
    fn test_segment_three_seconds_of_zeros() {
        let segmenter = WindowSegmenter::new(128, 5, 15);
        let windows = segmenter.segment(&constant_buffer(3 * 128, 0.0), &mut StdRng::seed_from_u64(1));

        assert_eq!(windows.len(), 1);
        assert!((windows[0].duration_secs - 3.0).abs() < 1e-9);
        assert_eq!(windows[0].means, ChannelValues::default());
    }

    #[test]
    fn test_segment_means_follow_order() {
        // One second of 1.0 then one second of 3.0, fixed 1s windows.
        let mut buffer = constant_buffer(4, 1.0);
        buffer.extend(constant_buffer(4, 3.0));
        let segmenter = WindowSegmenter::new(4, 1, 1);

        let windows = segmenter.segment(&buffer, &mut StdRng::seed_from_u64(9));
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].means.af3, 1.0);
        assert_eq!(windows[1].means.af4, 3.0);
    }

    #[test]
    fn test_zero_rate_never_panics() {
        let segmenter = WindowSegmenter::new(0, 1, 2);
        assert!(segmenter
            .segment(&constant_buffer(10, 1.0), &mut StdRng::seed_from_u64(0))
            .is_empty());
    }
}
