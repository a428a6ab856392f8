//! Core functionality for the EEG session agent.
//!
//! This module contains:
//! - Segmentation of an epoch buffer into variable-length windows
//! - Feature computation from window channel means
//! - Classifier artifacts and the continue/terminate verdict
//! - The closed-loop session controller

pub mod classifier;
pub mod features;
pub mod session;
pub mod windowing;

// Re-export commonly used types
pub use classifier::{
    mode_label, ArtifactError, Classifier, ClassifierError, Evaluation, ForestModel, Model,
    Scaler, ScalerPolicy, Verdict,
};
pub use features::{compute_all, compute_features, FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use session::{
    run_session, SessionController, SessionOutcome, SessionState, TerminationReason,
};
pub use windowing::{generate_durations, Window, WindowSegmenter};
