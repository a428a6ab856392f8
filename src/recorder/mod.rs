//! Session output sinks.
//!
//! A recorder accumulates accepted readings and event marks during a
//! session and writes them out on [`Recorder::flush`]. Flushing the same
//! accumulated data twice produces identical output.

pub mod flat_file;

use crate::collector::types::{EventMark, Reading};
use std::path::PathBuf;
use thiserror::Error;

pub use flat_file::{CsvRecorder, MARKS_HEADER, TIMESTAMP_HEADER};

/// Errors writing session output.
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("cannot write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot write CSV {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Append/flush sink for session data.
pub trait Recorder {
    fn record_reading(&mut self, reading: &Reading);

    fn record_mark(&mut self, mark: &EventMark);

    fn flush(&mut self) -> Result<(), RecorderError>;
}

impl<R: Recorder + ?Sized> Recorder for &mut R {
    fn record_reading(&mut self, reading: &Reading) {
        (**self).record_reading(reading);
    }

    fn record_mark(&mut self, mark: &EventMark) {
        (**self).record_mark(mark);
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        (**self).flush()
    }
}

/// Recorder that keeps everything in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryRecorder {
    pub readings: Vec<Reading>,
    pub marks: Vec<EventMark>,
    pub flush_count: usize,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for MemoryRecorder {
    fn record_reading(&mut self, reading: &Reading) {
        self.readings.push(*reading);
    }

    fn record_mark(&mut self, mark: &EventMark) {
        self.marks.push(mark.clone());
    }

    fn flush(&mut self) -> Result<(), RecorderError> {
        self.flush_count += 1;
        Ok(())
    }
}
