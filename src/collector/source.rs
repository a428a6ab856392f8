//! Sample sources feeding the session loop.
//!
//! A source is pulled one sample at a time. Pulls take a timeout so the loop
//! can notice a shutdown request even when the stream stalls.

use crate::collector::types::{Sample, StreamInfo};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while pulling a sample.
#[derive(Debug, Error)]
pub enum SourceError {
    /// One payload could not be decoded. The loop drops it and keeps going.
    #[error("malformed sample: {0}")]
    Malformed(String),
    /// The source is gone for good.
    #[error("sample source disconnected: {0}")]
    Disconnected(String),
}

impl SourceError {
    /// Whether the loop can recover by discarding the current sample.
    pub fn is_transient(&self) -> bool {
        matches!(self, SourceError::Malformed(_))
    }
}

/// A stream of timestamped multichannel readings.
pub trait SampleSource {
    /// Stream metadata. Fixed for the lifetime of the source.
    fn info(&self) -> StreamInfo;

    /// Wait up to `timeout` for the next sample.
    ///
    /// `Ok(None)` means nothing arrived in time; the caller should check for
    /// shutdown and pull again.
    fn pull(&mut self, timeout: Duration) -> Result<Option<Sample>, SourceError>;
}

/// Source backed by a crossbeam channel, fed by an acquisition thread.
pub struct ChannelSampleSource {
    info: StreamInfo,
    receiver: Receiver<Sample>,
}

impl ChannelSampleSource {
    pub fn new(info: StreamInfo, receiver: Receiver<Sample>) -> Self {
        Self { info, receiver }
    }

    /// Create a source together with the sender its producer writes to.
    pub fn bounded(info: StreamInfo, capacity: usize) -> (Sender<Sample>, Self) {
        let (sender, receiver) = bounded(capacity);
        (sender, Self::new(info, receiver))
    }
}

impl SampleSource for ChannelSampleSource {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn pull(&mut self, timeout: Duration) -> Result<Option<Sample>, SourceError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(sample) => Ok(Some(sample)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(SourceError::Disconnected(format!(
                "stream '{}' producer hung up",
                self.info.name
            ))),
        }
    }
}

/// Replays a recorded CSV of raw samples.
///
/// Expected layout: a header row, then `timestamp,ch0,ch1,...` rows where
/// `timestamp` is RFC 3339. Rows that fail to parse surface as
/// [`SourceError::Malformed`]; end of file surfaces as
/// [`SourceError::Disconnected`].
pub struct CsvReplaySource {
    info: StreamInfo,
    reader: csv::Reader<File>,
    record: csv::StringRecord,
    line: u64,
}

impl CsvReplaySource {
    pub fn open(path: &Path, nominal_srate: f64) -> Result<Self, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .map_err(|e| SourceError::Disconnected(format!("{}: {e}", path.display())))?;

        let channel_count = reader
            .headers()
            .map_err(|e| SourceError::Disconnected(format!("{}: {e}", path.display())))?
            .len()
            .saturating_sub(1);

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "replay".to_string());

        Ok(Self {
            info: StreamInfo {
                name,
                channel_count,
                nominal_srate,
            },
            reader,
            record: csv::StringRecord::new(),
            line: 1,
        })
    }

    fn parse_record(&self) -> Result<Sample, SourceError> {
        let mut fields = self.record.iter();
        let raw_ts = fields
            .next()
            .ok_or_else(|| SourceError::Malformed(format!("line {}: empty row", self.line)))?;
        let timestamp = DateTime::parse_from_rfc3339(raw_ts.trim())
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| SourceError::Malformed(format!("line {}: timestamp: {e}", self.line)))?;

        let channels = fields
            .map(|field| {
                field.trim().parse::<f64>().map_err(|e| {
                    SourceError::Malformed(format!("line {}: value '{field}': {e}", self.line))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Sample::new(timestamp, channels))
    }
}

impl SampleSource for CsvReplaySource {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn pull(&mut self, _timeout: Duration) -> Result<Option<Sample>, SourceError> {
        self.line += 1;
        let more = self
            .reader
            .read_record(&mut self.record)
            .map_err(|e| read_error(e, self.line))?;
        if !more {
            return Err(SourceError::Disconnected(format!(
                "replay of '{}' reached end of file",
                self.info.name
            )));
        }
        self.parse_record().map(Some)
    }
}

/// I/O failures end the replay; anything else only spoils the current row.
fn read_error(err: csv::Error, line: u64) -> SourceError {
    if matches!(err.kind(), csv::ErrorKind::Io(_)) {
        SourceError::Disconnected(format!("line {line}: {err}"))
    } else {
        SourceError::Malformed(format!("line {line}: {err}"))
    }
}
