//! Transparency module for the EEG session agent.
//!
//! Counts what each session collected and decided, for auditing after the
//! fact.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SharedTransparencyLog, TransparencyLog,
    Totals, TransparencyStats,
};
