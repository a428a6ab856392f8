//! Synheart EEG Agent - closed-loop EEG session recording for research.
//!
//! This library drives an EEG recording session that stops itself: every
//! epoch the buffered samples are cut into randomly sized windows, each
//! window is reduced to a fixed feature vector, and a pretrained classifier
//! votes on whether the participant has reached the target state.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Synheart EEG Agent                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐         │
//! │  │   Sample    │──▶│   Session   │──▶│  Windowing  │         │
//! │  │   Source    │   │ Controller  │   │  (random)   │         │
//! │  └─────────────┘   └─────────────┘   └─────────────┘         │
//! │  ┌─────────────┐          │ ▲               │                │
//! │  │     Key     │──marks──▶│ │ verdict       ▼                │
//! │  │  Listener   │          │ │        ┌─────────────┐         │
//! │  └─────────────┘          │ └────────│ Classifier  │◀─ feat. │
//! │                           ▼          └─────────────┘         │
//! │  ┌─────────────┐   ┌─────────────┐                           │
//! │  │Transparency │   │  Recorder   │                           │
//! │  │    Log      │   │   (CSV)     │                           │
//! │  └─────────────┘   └─────────────┘                           │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use std::sync::Arc;
//! use synheart_eeg_agent::{collector, config::Config, core, recorder, transparency};
//!
//! let config = Config::load().unwrap_or_default();
//! let source = collector::CsvReplaySource::open("session.csv".as_ref(), 256.0)
//!     .expect("Failed to open replay file");
//! let recorder = recorder::CsvRecorder::new(
//!     config.samples_path(),
//!     config.marks_path(),
//!     config.channels.headers(),
//! );
//!
//! let outcome = core::run_session(
//!     &config,
//!     source,
//!     None,
//!     recorder,
//!     Arc::new(AtomicBool::new(false)),
//!     transparency::create_shared_log(),
//! )
//! .expect("Session failed");
//! println!("stopped: {:?}", outcome.reason);
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod error;
pub mod recorder;
pub mod transparency;

// Re-export key types at crate root for convenience
pub use collector::{ChannelSampleSource, CsvReplaySource, EventMark, Sample, SampleSource};
pub use config::{Config, StopPolicy};
pub use core::{
    run_session, Classifier, FeatureVector, SessionController, SessionOutcome, TerminationReason,
    Verdict,
};
pub use error::SessionError;
pub use recorder::{CsvRecorder, Recorder};
pub use transparency::{SharedTransparencyLog, TransparencyLog, TransparencyStats};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
