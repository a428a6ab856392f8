//! Feature computation from averaged windows.
//!
//! Each window's channel means are expanded into a fixed set of named
//! features. Column order is fixed by [`FEATURE_NAMES`] and is the order the
//! classifier artifacts are trained against.

use crate::collector::types::ChannelValues;
use crate::core::windowing::Window;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;

/// Stabilizer added to denominators and log arguments.
const EPSILON: f64 = 1e-10;

/// Value substituted for a ratio whose denominator is exactly zero.
const RATIO_FALLBACK: f64 = 1.0;

/// Number of features per window.
pub const FEATURE_COUNT: usize = 30;

/// Feature names in column order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "duration_secs",
    "AF3",
    "T7",
    "Pz",
    "AF4",
    "frontal_ratio",
    "temporal_parietal_ratio",
    "frontal_asymmetry",
    "frontal_avg",
    "overall_avg",
    "channel_variance",
    "engagement_index",
    "AF3_squared",
    "T7_squared",
    "Pz_squared",
    "AF4_squared",
    "AF3_T7_interaction",
    "AF4_Pz_interaction",
    "engagement_per_second",
    "AF3_log",
    "T7_log",
    "Pz_log",
    "AF4_log",
    "simulated_theta_beta",
    "simulated_alpha_ratio",
    "AF3_per_second",
    "AF4_per_second",
    "T7_per_second",
    "Pz_per_second",
    "custom_activation_index",
];

/// Column index of a feature name.
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|&n| n == name)
}

/// Features derived from one window, in [`FEATURE_NAMES`] order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.values[i])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }

    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }
}

/// Compute the feature vector for a window.
///
/// Every value is finite for a window with finite means and a positive
/// duration.
pub fn compute_features(window: &Window) -> FeatureVector {
    let ChannelValues { af3, t7, pz, af4 } = window.means;
    let duration = window.duration_secs;
    let channels = window.means.to_array();

    let overall_avg = channels.iter().mean();
    let channel_variance = channels.iter().population_variance();
    let engagement_index = (af3 + af4 + pz) / 3.0;

    let values = [
        duration,
        af3,
        t7,
        pz,
        af4,
        ratio_or_fallback(af3, af4),
        ratio_or_fallback(t7, pz),
        af4 - af3,
        (af3 + af4) / 2.0,
        overall_avg,
        channel_variance,
        engagement_index,
        af3 * af3,
        t7 * t7,
        pz * pz,
        af4 * af4,
        af3 * t7,
        af4 * pz,
        engagement_index / duration,
        stable_ln(af3),
        stable_ln(t7),
        stable_ln(pz),
        stable_ln(af4),
        (pz + t7) / (af3 + af4 + EPSILON),
        (t7 + pz) / (overall_avg + EPSILON),
        af3 / duration,
        af4 / duration,
        t7 / duration,
        pz / duration,
        (af3 * pz) / (t7 + EPSILON),
    ];

    FeatureVector { values }
}

/// Compute feature vectors for a batch of windows, preserving order.
pub fn compute_all(windows: &[Window]) -> Vec<FeatureVector> {
    windows.iter().map(compute_features).collect()
}

fn ratio_or_fallback(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        RATIO_FALLBACK
    } else {
        numerator / denominator
    }
}

fn stable_ln(value: f64) -> f64 {
    (value.abs() + EPSILON).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(duration_secs: f64, af3: f64, t7: f64, pz: f64, af4: f64) -> Window {
        Window {
            duration_secs,
            means: ChannelValues::new(af3, t7, pz, af4),
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_feature_names_are_unique() {
        let mut names = FEATURE_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_all_zero_window() {
        let features = compute_features(&window(3.0, 0.0, 0.0, 0.0, 0.0));

        assert!(features.is_finite());
        assert_eq!(features.get("frontal_ratio"), Some(1.0));
        assert_eq!(features.get("temporal_parietal_ratio"), Some(1.0));
        for name in [
            "AF3_squared",
            "T7_squared",
            "Pz_squared",
            "AF4_squared",
            "AF3_T7_interaction",
            "AF4_Pz_interaction",
            "custom_activation_index",
        ] {
            assert_eq!(features.get(name), Some(0.0), "{name}");
        }
        assert!(approx(features.get("AF3_log").unwrap(), (1e-10f64).ln()));
    }

    #[test]
    fn test_known_values() {
        let features = compute_features(&window(2.0, 2.0, 4.0, 8.0, 6.0));

        assert!(approx(features.get("frontal_ratio").unwrap(), 2.0 / 6.0));
        assert!(approx(features.get("temporal_parietal_ratio").unwrap(), 0.5));
        assert!(approx(features.get("frontal_asymmetry").unwrap(), 4.0));
        assert!(approx(features.get("frontal_avg").unwrap(), 4.0));
        assert!(approx(features.get("overall_avg").unwrap(), 5.0));
        // Population variance of [2, 4, 8, 6]
        assert!(approx(features.get("channel_variance").unwrap(), 5.0));
        assert!(approx(features.get("engagement_index").unwrap(), 16.0 / 3.0));
        assert!(approx(features.get("engagement_per_second").unwrap(), 8.0 / 3.0));
        assert!(approx(features.get("AF3_T7_interaction").unwrap(), 8.0));
        assert!(approx(features.get("AF4_Pz_interaction").unwrap(), 48.0));
        assert!(approx(features.get("Pz_per_second").unwrap(), 4.0));
        assert!(approx(features.get("custom_activation_index").unwrap(), 4.0));
        assert!(approx(features.get("simulated_theta_beta").unwrap(), 12.0 / 8.0));
        assert!(approx(features.get("simulated_alpha_ratio").unwrap(), 12.0 / 5.0));
    }

    #[test]
    fn test_negative_and_zero_channels_stay_finite() {
        let cases = [
            window(1.0, -3.0, 0.0, 2.0, 0.0),
            window(5.0, 0.0, -1.0, 0.0, 7.5),
            window(0.5, -1e6, 1e6, -2.0, 1e-12),
        ];
        for w in &cases {
            assert!(compute_features(w).is_finite(), "{w:?}");
        }
    }

    #[test]
    fn test_deterministic() {
        let w = window(4.0, 1.25, -0.5, 3.75, 2.0);
        let a = compute_features(&w);
        let b = compute_features(&w);
        let bits_a: Vec<u64> = a.as_slice().iter().map(|v| v.to_bits()).collect();
        let bits_b: Vec<u64> = b.as_slice().iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits_a, bits_b);
    }

    #[test]
    fn test_raw_window_is_recoverable() {
        let w = window(4.0, 1.25, -0.5, 3.75, 2.0);
        let features = compute_features(&w);
        assert_eq!(features.get("duration_secs"), Some(4.0));
        assert_eq!(features.get("AF3"), Some(1.25));
        assert_eq!(features.get("T7"), Some(-0.5));
        assert_eq!(features.get("Pz"), Some(3.75));
        assert_eq!(features.get("AF4"), Some(2.0));
    }
}
