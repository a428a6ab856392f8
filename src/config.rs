//! Configuration for the EEG session agent.

use crate::collector::types::ChannelValues;
use crate::core::classifier::ScalerPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Samples per second; `None` takes the stream's nominal rate
    pub sampling_rate_hz: Option<u32>,

    /// Raw stream indices of the analysis channels
    pub channels: ChannelMap,

    /// Epoch length after which the classifier is consulted
    #[serde(with = "duration_serde")]
    pub epoch_threshold: Duration,

    /// Hard cap on total session length
    #[serde(with = "option_duration_serde")]
    pub session_cap: Option<Duration>,

    /// What ends a session
    pub stop_policy: StopPolicy,

    /// Shortest window drawn by the segmenter, in seconds
    pub min_window_secs: u32,

    /// Longest window drawn by the segmenter, in seconds
    pub max_window_secs: u32,

    /// Classifier label whose majority ends the session
    pub positive_label: String,

    /// Directory holding `scaler.json` and `model.json`
    pub artifact_dir: PathBuf,

    /// Source of standardization statistics
    pub scaler_policy: ScalerPolicy,

    /// Key whose presses are recorded as event marks
    pub event_key: String,

    /// How long one sample pull may block before re-checking for shutdown
    pub pull_timeout_ms: u64,

    /// Seed for window duration draws; `None` seeds from entropy
    pub seed: Option<u64>,

    /// Directory for session output and transparency stats
    pub data_path: PathBuf,

    /// File name of the per-sample output
    pub samples_file: String,

    /// File name of the event mark output
    pub marks_file: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-eeg-agent");

        Self {
            sampling_rate_hz: None,
            channels: ChannelMap::default(),
            epoch_threshold: Duration::from_secs(120),
            session_cap: None,
            stop_policy: StopPolicy::Classifier,
            min_window_secs: 3,
            max_window_secs: 15,
            positive_label: "Excited".to_string(),
            artifact_dir: data_dir.join("artifacts"),
            scaler_policy: ScalerPolicy::Pretrained,
            event_key: "down".to_string(),
            pull_timeout_ms: 100,
            seed: None,
            data_path: data_dir,
            samples_file: "eeg_data.csv".to_string(),
            marks_file: "downstroke_data.csv".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a file, falling back to defaults when absent.
    pub fn load_from(config_path: &std::path::Path) -> Result<Self, ConfigError> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(&config_path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("synheart-eeg-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    pub fn samples_path(&self) -> PathBuf {
        self.data_path.join(&self.samples_file)
    }

    pub fn marks_path(&self) -> PathBuf {
        self.data_path.join(&self.marks_file)
    }

    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    pub fn pull_timeout(&self) -> Duration {
        Duration::from_millis(self.pull_timeout_ms)
    }

    /// Reject settings the session loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "min_window_secs must be at least 1".to_string(),
            ));
        }
        if self.min_window_secs > self.max_window_secs {
            return Err(ConfigError::Invalid(format!(
                "min_window_secs ({}) exceeds max_window_secs ({})",
                self.min_window_secs, self.max_window_secs
            )));
        }
        if self.epoch_threshold.is_zero() {
            return Err(ConfigError::Invalid(
                "epoch_threshold must be positive".to_string(),
            ));
        }
        if self.sampling_rate_hz == Some(0) {
            return Err(ConfigError::Invalid(
                "sampling_rate_hz must be positive".to_string(),
            ));
        }
        if self.positive_label.is_empty() {
            return Err(ConfigError::Invalid("positive_label is empty".to_string()));
        }
        self.channels.validate()
    }
}

/// What ends a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopPolicy {
    /// Consult the classifier at every epoch boundary.
    #[default]
    Classifier,
    /// Stop unconditionally once the first epoch elapses.
    Elapsed,
}

/// Raw stream indices of the four analysis channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMap {
    pub af3: usize,
    pub t7: usize,
    pub pz: usize,
    pub af4: usize,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            af3: 3,
            t7: 4,
            pz: 5,
            af4: 7,
        }
    }
}

impl ChannelMap {
    /// Indices in AF3, T7, Pz, AF4 order.
    pub fn indices(&self) -> [usize; 4] {
        [self.af3, self.t7, self.pz, self.af4]
    }

    /// Minimum raw channel count a sample needs.
    pub fn required_channels(&self) -> usize {
        self.indices().iter().copied().max().unwrap_or(0) + 1
    }

    /// Pick the analysis channels out of a raw sample. `None` when the sample
    /// is too short.
    pub fn select(&self, raw: &[f64]) -> Option<ChannelValues> {
        Some(ChannelValues::new(
            *raw.get(self.af3)?,
            *raw.get(self.t7)?,
            *raw.get(self.pz)?,
            *raw.get(self.af4)?,
        ))
    }

    /// Column headers for recorded samples, e.g. `ch3`.
    pub fn headers(&self) -> Vec<String> {
        self.indices().iter().map(|i| format!("ch{i}")).collect()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let indices = self.indices();
        for (i, a) in indices.iter().enumerate() {
            if indices[i + 1..].contains(a) {
                return Err(ConfigError::Invalid(format!(
                    "channel index {a} is mapped twice"
                )));
            }
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for an optional Duration, as whole seconds or null.
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
