//! Reading and event types shared by the sample source, the key listener and
//! the session loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Number of channels in the analysis montage.
pub const CHANNEL_COUNT: usize = 4;

/// Display names of the montage channels, in `ChannelValues` field order.
pub const CHANNEL_NAMES: [&str; CHANNEL_COUNT] = ["AF3", "T7", "Pz", "AF4"];

/// Metadata reported by a sample source once, at session start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    /// Stream name (e.g. `EmotivDataStream-EEG`)
    pub name: String,
    /// Number of channels in each raw sample
    pub channel_count: usize,
    /// Nominal sampling rate in Hz (0.0 when irregular or unknown)
    pub nominal_srate: f64,
}

/// One raw multichannel reading as delivered by the sample source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Arrival timestamp
    pub timestamp: DateTime<Utc>,
    /// All channel values, in stream order
    pub channels: Vec<f64>,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, channels: Vec<f64>) -> Self {
        Self {
            timestamp,
            channels,
        }
    }
}

/// Values of the four analysis channels.
///
/// Used both for a single accepted reading and for the per-window means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelValues {
    pub af3: f64,
    pub t7: f64,
    pub pz: f64,
    pub af4: f64,
}

impl ChannelValues {
    pub fn new(af3: f64, t7: f64, pz: f64, af4: f64) -> Self {
        Self { af3, t7, pz, af4 }
    }

    /// Build from an array in `CHANNEL_NAMES` order.
    pub fn from_array(values: [f64; CHANNEL_COUNT]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    /// Values in `CHANNEL_NAMES` order.
    pub fn to_array(&self) -> [f64; CHANNEL_COUNT] {
        [self.af3, self.t7, self.pz, self.af4]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

/// A reading that passed channel validation, reduced to the montage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub timestamp: DateTime<Utc>,
    pub values: ChannelValues,
}

/// Identity of a key on the event source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyId(pub String);

impl KeyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().to_lowercase())
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key transition direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyEdge {
    Down,
    Up,
}

/// A discrete key transition from the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub timestamp: DateTime<Utc>,
    pub key: KeyId,
    pub edge: KeyEdge,
}

impl KeyEvent {
    pub fn new(timestamp: DateTime<Utc>, key: KeyId, edge: KeyEdge) -> Self {
        Self {
            timestamp,
            key,
            edge,
        }
    }

    pub fn down(timestamp: DateTime<Utc>, key: &KeyId) -> Self {
        Self::new(timestamp, key.clone(), KeyEdge::Down)
    }

    pub fn up(timestamp: DateTime<Utc>, key: &KeyId) -> Self {
        Self::new(timestamp, key.clone(), KeyEdge::Up)
    }
}

/// A press of the designated key, with the gap since the previous mark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMark {
    pub timestamp: DateTime<Utc>,
    pub since_previous: Duration,
}

impl EventMark {
    pub fn since_previous_secs(&self) -> f64 {
        self.since_previous.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_values_array_order() {
        let values = ChannelValues::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(values.to_array(), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(ChannelValues::from_array([1.0, 2.0, 3.0, 4.0]), values);
    }

    #[test]
    fn test_channel_values_finite() {
        assert!(ChannelValues::default().is_finite());
        assert!(!ChannelValues::new(f64::NAN, 0.0, 0.0, 0.0).is_finite());
        assert!(!ChannelValues::new(0.0, 0.0, f64::INFINITY, 0.0).is_finite());
    }

    #[test]
    fn test_key_id_is_case_insensitive() {
        assert_eq!(KeyId::new("Down"), KeyId::new("down"));
        assert_eq!(KeyId::new("DOWN").to_string(), "down");
    }
}
