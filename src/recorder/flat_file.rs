//! CSV recorder writing the session's readings and event marks.

use crate::collector::types::{EventMark, Reading};
use crate::recorder::{Recorder, RecorderError};
use chrono::SecondsFormat;
use std::path::{Path, PathBuf};

/// Header of the timestamp column in the samples file.
pub const TIMESTAMP_HEADER: &str = "timestamp";

/// Header row of the marks file.
pub const MARKS_HEADER: &str = "time_since_last_down";

/// Writes two files on flush: one row per reading, one row per mark.
///
/// Both files are rewritten from the accumulated data on every flush.
#[derive(Debug, Clone)]
pub struct CsvRecorder {
    samples_path: PathBuf,
    marks_path: PathBuf,
    channel_headers: Vec<String>,
    readings: Vec<Reading>,
    marks: Vec<EventMark>,
}

impl CsvRecorder {
    /// `channel_headers` name the four value columns after the timestamp.
    pub fn new(samples_path: PathBuf, marks_path: PathBuf, channel_headers: Vec<String>) -> Self {
        Self {
            samples_path,
            marks_path,
            channel_headers,
            readings: Vec::new(),
            marks: Vec::new(),
        }
    }

    pub fn samples_path(&self) -> &Path {
        &self.samples_path
    }

    pub fn marks_path(&self) -> &Path {
        &self.marks_path
    }

    fn write_samples(&self) -> Result<(), RecorderError> {
        let mut writer = open_writer(&self.samples_path)?;
        let csv_err = |source| RecorderError::Csv {
            path: self.samples_path.clone(),
            source,
        };

        let mut header = vec![TIMESTAMP_HEADER.to_string()];
        header.extend(self.channel_headers.iter().cloned());
        writer.write_record(&header).map_err(csv_err)?;

        for reading in &self.readings {
            let mut row = vec![reading
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true)];
            row.extend(reading.values.to_array().iter().map(|v| v.to_string()));
            writer.write_record(&row).map_err(csv_err)?;
        }

        writer.flush().map_err(|source| RecorderError::Io {
            path: self.samples_path.clone(),
            source,
        })
    }

    fn write_marks(&self) -> Result<(), RecorderError> {
        let mut writer = open_writer(&self.marks_path)?;
        let csv_err = |source| RecorderError::Csv {
            path: self.marks_path.clone(),
            source,
        };

        writer.write_record([MARKS_HEADER]).map_err(csv_err)?;
        for mark in &self.marks {
            writer
                .write_record([mark.since_previous_secs().to_string()])
                .map_err(csv_err)?;
        }

        writer.flush().map_err(|source| RecorderError::Io {
            path: self.marks_path.clone(),
            source,
        })
    }
}

impl Recorder for CsvRecorder {
    fn record_reading(&mut self, reading: &Reading) {
        self.readings.push(*reading);
    }

    fn record_mark(&mut self, mark: &EventMark) {
        self.marks.push(mark.clone());
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        self.write_samples()?;
        self.write_marks()?;
        tracing::info!(
            samples = self.readings.len(),
            marks = self.marks.len(),
            samples_path = %self.samples_path.display(),
            marks_path = %self.marks_path.display(),
            "session data written"
        );
        Ok(())
    }
}

fn open_writer(path: &Path) -> Result<csv::Writer<std::fs::File>, RecorderError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| RecorderError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    csv::Writer::from_path(path).map_err(|source| RecorderError::Csv {
        path: path.to_path_buf(),
        source,
    })
}
