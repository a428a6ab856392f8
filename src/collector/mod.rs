//! Input side of the agent.
//!
//! This module provides the sample source abstraction that feeds the session
//! loop and the background key listener that produces event marks.

pub mod listener;
pub mod source;
pub mod types;

// Re-export commonly used types
pub use listener::{EventListener, KeyLatch, LatchState};
pub use source::{ChannelSampleSource, CsvReplaySource, SampleSource, SourceError};
pub use types::{
    ChannelValues, EventMark, KeyEdge, KeyEvent, KeyId, Reading, Sample, StreamInfo,
    CHANNEL_COUNT, CHANNEL_NAMES,
};
