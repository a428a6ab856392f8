//! The closed-loop session controller.
//!
//! Pulls samples, keeps the current epoch's readings, and at each epoch
//! boundary runs segmentation, feature extraction and classification to
//! decide whether to keep collecting. On termination, by verdict, duration
//! cap or shutdown, it stops the key listener and flushes the recorder.
//!
//! ```text
//!        ┌──────────── continue ────────────┐
//!        ▼                                  │
//!   COLLECTING ── epoch elapsed ──▶ EVALUATING ── terminate ──▶ TERMINATED
//!        │                                                          ▲
//!        └────────────── session cap / shutdown ────────────────────┘
//! ```

use crate::collector::listener::{EventListener, KeyLatch};
use crate::collector::source::SampleSource;
use crate::collector::types::{ChannelValues, KeyEvent, KeyId, Reading, Sample};
use crate::config::{ChannelMap, Config, StopPolicy};
use crate::core::classifier::{Classifier, Evaluation};
use crate::core::features::compute_all;
use crate::core::windowing::WindowSegmenter;
use crate::error::SessionError;
use crate::recorder::Recorder;
use crate::transparency::{create_shared_log, SharedTransparencyLog};
use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Collecting,
    Evaluating,
    Terminated,
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The classifier's majority label was the positive class
    Verdict,
    /// The first epoch elapsed under [`StopPolicy::Elapsed`]
    EpochElapsed,
    /// The hard session cap was reached
    SessionCap,
    /// Shutdown was requested
    Shutdown,
}

/// Summary of a finished session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionOutcome {
    pub session_id: Uuid,
    pub reason: TerminationReason,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub epochs_evaluated: u64,
    pub samples_recorded: u64,
    pub marks_recorded: u64,
    /// Classification of the last evaluated epoch, if any
    pub last_evaluation: Option<Evaluation>,
}

/// Drives one session from first pull to final flush.
pub struct SessionController<S: SampleSource, R: Recorder> {
    session_id: Uuid,
    source: S,
    recorder: R,
    classifier: Option<Classifier>,
    segmenter: WindowSegmenter,
    rng: StdRng,
    channels: ChannelMap,
    stop_policy: StopPolicy,
    epoch_threshold: chrono::Duration,
    session_cap: Option<chrono::Duration>,
    wall_cap: Option<Duration>,
    pull_timeout: Duration,
    listener: Option<EventListener>,
    shutdown: Arc<AtomicBool>,
    stats: SharedTransparencyLog,

    state: SessionState,
    buffer: Vec<ChannelValues>,
    session_start: Option<DateTime<Utc>>,
    pulling_since: Option<Instant>,
    epoch_start: Option<DateTime<Utc>>,
    last_timestamp: Option<DateTime<Utc>>,
    epochs_evaluated: u64,
    samples_recorded: u64,
    marks_recorded: u64,
    last_evaluation: Option<Evaluation>,
    termination: Option<TerminationReason>,
    flushed: bool,
}

impl<S: SampleSource, R: Recorder> SessionController<S, R> {
    /// Build a controller.
    ///
    /// A classifier is required under [`StopPolicy::Classifier`]. The
    /// sampling rate comes from the config or, failing that, from the
    /// stream's nominal rate.
    pub fn new(
        config: &Config,
        source: S,
        recorder: R,
        classifier: Option<Classifier>,
    ) -> Result<Self, SessionError> {
        config
            .validate()
            .map_err(|e| SessionError::InvalidConfig(e.to_string()))?;

        if config.stop_policy == StopPolicy::Classifier && classifier.is_none() {
            return Err(SessionError::InvalidConfig(
                "classifier stop policy needs loaded artifacts".to_string(),
            ));
        }

        let info = source.info();
        tracing::info!(
            stream = %info.name,
            channels = info.channel_count,
            nominal_srate = info.nominal_srate,
            "connected to sample stream"
        );

        let samples_per_second = match config.sampling_rate_hz {
            Some(rate) => rate as usize,
            None if info.nominal_srate.is_finite() && info.nominal_srate >= 1.0 => {
                info.nominal_srate.round() as usize
            }
            None => {
                return Err(SessionError::InvalidConfig(format!(
                    "stream '{}' reports no usable sampling rate ({}); set sampling_rate_hz",
                    info.name, info.nominal_srate
                )))
            }
        };

        let required = config.channels.required_channels();
        if info.channel_count < required {
            tracing::warn!(
                stream_channels = info.channel_count,
                required,
                "stream reports fewer channels than the montage needs; short samples will be dropped"
            );
        }

        let to_chrono = |d: Duration| {
            chrono::Duration::from_std(d)
                .map_err(|e| SessionError::InvalidConfig(format!("duration out of range: {e}")))
        };
        let epoch_threshold = to_chrono(config.epoch_threshold)?;
        let session_cap = config.session_cap.map(to_chrono).transpose()?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Ok(Self {
            session_id: Uuid::new_v4(),
            source,
            recorder,
            classifier,
            segmenter: WindowSegmenter::new(
                samples_per_second,
                config.min_window_secs,
                config.max_window_secs,
            ),
            rng,
            channels: config.channels,
            stop_policy: config.stop_policy,
            epoch_threshold,
            session_cap,
            wall_cap: config.session_cap,
            pull_timeout: config.pull_timeout(),
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: create_shared_log(),
            state: SessionState::Collecting,
            buffer: Vec::new(),
            session_start: None,
            pulling_since: None,
            epoch_start: None,
            last_timestamp: None,
            epochs_evaluated: 0,
            samples_recorded: 0,
            marks_recorded: 0,
            last_evaluation: None,
            termination: None,
            flushed: false,
        })
    }

    /// Attach a running key listener.
    pub fn with_listener(mut self, listener: EventListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Share a shutdown flag; setting it ends the session at the next pull.
    pub fn with_shutdown(mut self, shutdown: Arc<AtomicBool>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_stats(mut self, stats: SharedTransparencyLog) -> Self {
        self.stats = stats;
        self
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Readings held for the current epoch.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn epochs_evaluated(&self) -> u64 {
        self.epochs_evaluated
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Run until the session terminates.
    ///
    /// On error the listener is stopped and whatever was collected is
    /// flushed before the error is returned.
    pub fn run(mut self) -> Result<SessionOutcome, SessionError> {
        tracing::info!(session_id = %self.session_id, "session started");
        loop {
            match self.step() {
                Ok(SessionState::Terminated) => return Ok(self.outcome()),
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(session_id = %self.session_id, "session aborted: {e}");
                    self.abort();
                    return Err(e);
                }
            }
        }
    }

    /// Advance the state machine by one pull (or one evaluation).
    pub fn step(&mut self) -> Result<SessionState, SessionError> {
        match self.state {
            SessionState::Terminated => return Ok(self.state),
            SessionState::Evaluating => {
                let at = self.last_timestamp.unwrap_or_else(Utc::now);
                self.evaluate(at)?;
                return Ok(self.state);
            }
            SessionState::Collecting => {}
        }

        if self.shutdown.load(Ordering::SeqCst) {
            self.terminate(TerminationReason::Shutdown)?;
            return Ok(self.state);
        }

        if self.listener.as_ref().is_some_and(|l| l.is_disconnected()) {
            return Err(SessionError::SourceUnavailable(
                "key event source disconnected".to_string(),
            ));
        }
        self.collect_marks();

        let pulling_since = *self.pulling_since.get_or_insert_with(Instant::now);
        let sample = match self.source.pull(self.pull_timeout) {
            Ok(Some(sample)) => sample,
            Ok(None) => {
                // A stalled stream never advances sample time.
                if self.wall_cap.is_some_and(|cap| pulling_since.elapsed() >= cap) {
                    tracing::info!("session cap reached while waiting for samples");
                    self.terminate(TerminationReason::SessionCap)?;
                }
                return Ok(self.state);
            }
            Err(e) if e.is_transient() => {
                let err = SessionError::TransientSample(e.to_string());
                tracing::warn!("{err}; sample discarded");
                self.stats.record_sample_discarded();
                return Ok(self.state);
            }
            Err(e) => return Err(SessionError::SourceUnavailable(e.to_string())),
        };

        self.ingest(sample)?;
        Ok(self.state)
    }

    fn ingest(&mut self, sample: Sample) -> Result<(), SessionError> {
        let now = sample.timestamp;
        let session_start = *self.session_start.get_or_insert(now);
        let epoch_start = *self.epoch_start.get_or_insert(now);
        self.last_timestamp = Some(now);

        match self.channels.select(&sample.channels) {
            Some(values) if values.is_finite() => {
                self.buffer.push(values);
                self.recorder.record_reading(&Reading {
                    timestamp: now,
                    values,
                });
                self.samples_recorded += 1;
                self.stats.record_sample_accepted();
            }
            _ => {
                tracing::debug!(
                    channels = sample.channels.len(),
                    required = self.channels.required_channels(),
                    "sample discarded"
                );
                self.stats.record_sample_discarded();
            }
        }

        if let Some(cap) = self.session_cap {
            if now - session_start >= cap {
                tracing::info!("session cap reached");
                return self.terminate(TerminationReason::SessionCap);
            }
        }

        if now - epoch_start > self.epoch_threshold {
            match self.stop_policy {
                StopPolicy::Elapsed => return self.terminate(TerminationReason::EpochElapsed),
                StopPolicy::Classifier => {
                    self.state = SessionState::Evaluating;
                    self.evaluate(now)?;
                }
            }
        }

        Ok(())
    }

    fn evaluate(&mut self, at: DateTime<Utc>) -> Result<(), SessionError> {
        let windows = self.segmenter.segment(&self.buffer, &mut self.rng);
        if windows.is_empty() {
            tracing::info!(
                readings = self.buffer.len(),
                "epoch shorter than one second; continuing"
            );
            self.start_next_epoch(at);
            return Ok(());
        }

        let features = compute_all(&windows);
        let classifier = self.classifier.as_ref().ok_or_else(|| {
            SessionError::InvalidConfig("no classifier loaded".to_string())
        })?;
        let evaluation = classifier.evaluate(&features)?;

        self.epochs_evaluated += 1;
        self.stats.record_epoch_evaluated(windows.len() as u64);
        tracing::info!(
            epoch = self.epochs_evaluated,
            windows = windows.len(),
            labels = ?evaluation.labels,
            mode = %evaluation.mode,
            verdict = ?evaluation.verdict,
            "epoch evaluated"
        );

        let terminate = evaluation.verdict.is_terminate();
        self.last_evaluation = Some(evaluation);
        if terminate {
            self.terminate(TerminationReason::Verdict)
        } else {
            self.start_next_epoch(at);
            Ok(())
        }
    }

    fn start_next_epoch(&mut self, at: DateTime<Utc>) {
        self.buffer.clear();
        self.epoch_start = Some(at);
        self.state = SessionState::Collecting;
    }

    fn collect_marks(&mut self) {
        if let Some(listener) = &self.listener {
            for mark in listener.drain() {
                self.recorder.record_mark(&mark);
                self.marks_recorded += 1;
                self.stats.record_event_mark();
            }
        }
    }

    fn terminate(&mut self, reason: TerminationReason) -> Result<(), SessionError> {
        tracing::info!(session_id = %self.session_id, ?reason, "session terminating");
        self.state = SessionState::Terminated;
        self.termination = Some(reason);
        self.finish()
    }

    /// Stop the listener, collect its last marks and flush everything.
    fn finish(&mut self) -> Result<(), SessionError> {
        if let Some(listener) = self.listener.as_mut() {
            listener.stop();
        }
        self.collect_marks();

        self.recorder.flush()?;
        self.flushed = true;

        if let Err(e) = self.stats.save() {
            tracing::warn!("could not save transparency stats: {e}");
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.state = SessionState::Terminated;
        if self.flushed {
            return;
        }
        if let Err(e) = self.finish() {
            tracing::error!("flush after abort failed: {e}");
        }
    }

    fn outcome(&self) -> SessionOutcome {
        SessionOutcome {
            session_id: self.session_id,
            reason: self.termination.unwrap_or(TerminationReason::Shutdown),
            started_at: self.session_start,
            ended_at: self.last_timestamp,
            epochs_evaluated: self.epochs_evaluated,
            samples_recorded: self.samples_recorded,
            marks_recorded: self.marks_recorded,
            last_evaluation: self.last_evaluation.clone(),
        }
    }
}

/// Run one session end to end.
///
/// Loads the classifier artifacts when the stop policy needs them, starts
/// the key listener when `key_events` is given, and drives the loop until
/// termination.
pub fn run_session<S: SampleSource, R: Recorder>(
    config: &Config,
    source: S,
    key_events: Option<Receiver<KeyEvent>>,
    recorder: R,
    shutdown: Arc<AtomicBool>,
    stats: SharedTransparencyLog,
) -> Result<SessionOutcome, SessionError> {
    let classifier = match config.stop_policy {
        StopPolicy::Classifier => {
            let classifier = Classifier::load(
                &config.artifact_dir,
                config.positive_label.clone(),
                config.scaler_policy,
            )?;
            tracing::info!(
                artifact_dir = %config.artifact_dir.display(),
                columns = classifier.feature_names().len(),
                positive_label = classifier.positive_label(),
                "classifier artifacts loaded"
            );
            Some(classifier)
        }
        StopPolicy::Elapsed => None,
    };

    let mut controller = SessionController::new(config, source, recorder, classifier)?
        .with_shutdown(shutdown)
        .with_stats(stats);

    if let Some(events) = key_events {
        let latch = KeyLatch::new(KeyId::new(config.event_key.as_str()), Utc::now());
        controller = controller.with_listener(EventListener::start(events, latch));
    }

    controller.run()
}
