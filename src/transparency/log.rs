//! Session transparency log.
//!
//! Tracks how much was collected and decided during a session so the
//! participant and the researcher can audit it afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Collection counters for the current session.
#[derive(Debug)]
pub struct TransparencyLog {
    /// Samples that passed channel validation
    samples_accepted: AtomicU64,
    /// Samples dropped as short or malformed
    samples_discarded: AtomicU64,
    /// Epochs that reached the classifier
    epochs_evaluated: AtomicU64,
    /// Windows classified across all epochs
    windows_classified: AtomicU64,
    /// Event marks recorded
    event_marks: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Totals persisted by earlier sessions
    previous: Totals,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl TransparencyLog {
    pub fn new() -> Self {
        Self {
            samples_accepted: AtomicU64::new(0),
            samples_discarded: AtomicU64::new(0),
            epochs_evaluated: AtomicU64::new(0),
            windows_classified: AtomicU64::new(0),
            event_marks: AtomicU64::new(0),
            session_start: Utc::now(),
            previous: Totals::default(),
            persist_path: None,
        }
    }

    /// Create a log whose saved totals build on previously persisted ones.
    /// Session counters still start at zero.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!("could not load previous transparency stats: {e}");
        }

        log
    }

    pub fn record_sample_accepted(&self) {
        self.samples_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_discarded(&self) {
        self.samples_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_epoch_evaluated(&self, windows: u64) {
        self.epochs_evaluated.fetch_add(1, Ordering::Relaxed);
        self.windows_classified.fetch_add(windows, Ordering::Relaxed);
    }

    pub fn record_event_mark(&self) {
        self.event_marks.fetch_add(1, Ordering::Relaxed);
    }

    /// Counters for the current session only.
    pub fn stats(&self) -> TransparencyStats {
        TransparencyStats {
            samples_accepted: self.samples_accepted.load(Ordering::Relaxed),
            samples_discarded: self.samples_discarded.load(Ordering::Relaxed),
            epochs_evaluated: self.epochs_evaluated.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            event_marks: self.event_marks.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Earlier sessions' persisted totals plus the current session.
    pub fn totals(&self) -> Totals {
        let stats = self.stats();
        Totals {
            samples_accepted: self.previous.samples_accepted + stats.samples_accepted,
            samples_discarded: self.previous.samples_discarded + stats.samples_discarded,
            epochs_evaluated: self.previous.epochs_evaluated + stats.epochs_evaluated,
            windows_classified: self.previous.windows_classified + stats.windows_classified,
            event_marks: self.previous.event_marks + stats.event_marks,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics:\n\
             - Samples accepted: {}\n\
             - Samples discarded: {}\n\
             - Epochs evaluated: {}\n\
             - Windows classified: {}\n\
             - Event marks: {}\n\
             - Session duration: {} seconds",
            stats.samples_accepted,
            stats.samples_discarded,
            stats.epochs_evaluated,
            stats.windows_classified,
            stats.event_marks,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let persisted = PersistedStats {
                totals: self.totals(),
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;
                self.previous = persisted.totals;
            }
        }
        Ok(())
    }
}

impl Default for TransparencyLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of transparency statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransparencyStats {
    pub samples_accepted: u64,
    pub samples_discarded: u64,
    pub epochs_evaluated: u64,
    pub windows_classified: u64,
    pub event_marks: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Counts accumulated across sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub samples_accepted: u64,
    pub samples_discarded: u64,
    pub epochs_evaluated: u64,
    pub windows_classified: u64,
    pub event_marks: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    #[serde(flatten)]
    totals: Totals,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared transparency log.
pub type SharedTransparencyLog = Arc<TransparencyLog>;

/// Create a new shared transparency log.
pub fn create_shared_log() -> SharedTransparencyLog {
    Arc::new(TransparencyLog::new())
}

/// Create a new shared transparency log with persistence.
pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedTransparencyLog {
    Arc::new(TransparencyLog::with_persistence(path))
}
