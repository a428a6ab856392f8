//! End-to-end tests for the session loop.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use crossbeam_channel::{unbounded, Sender};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use synheart_eeg_agent::collector::{
    ChannelSampleSource, ChannelValues, KeyEvent, KeyId, Sample, StreamInfo,
};
use synheart_eeg_agent::config::{Config, StopPolicy};
use synheart_eeg_agent::core::{
    compute_all, run_session, TerminationReason, Verdict, WindowSegmenter, FEATURE_NAMES,
};
use synheart_eeg_agent::recorder::CsvRecorder;
use synheart_eeg_agent::transparency::create_shared_log;
use synheart_eeg_agent::SessionError;

struct TestDir(PathBuf);

impl TestDir {
    fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("synheart-eeg-session-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        Self(dir)
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TestDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}

/// Single-stump forest: AF3 above 50 is Excited, otherwise Calm.
fn write_artifacts(dir: &Path) {
    let scaler = serde_json::json!({
        "feature_names": ["AF3"],
        "mean": [0.0],
        "scale": [1.0],
    });
    let model = serde_json::json!({
        "feature_names": ["AF3"],
        "classes": ["Calm", "Excited"],
        "trees": [{
            "nodes": [
                {"feature": 0, "threshold": 50.0, "left": 1, "right": 2},
                {"value": [1.0, 0.0]},
                {"value": [0.0, 1.0]},
            ]
        }],
    });
    std::fs::write(dir.join("scaler.json"), scaler.to_string()).unwrap();
    std::fs::write(dir.join("model.json"), model.to_string()).unwrap();
}

fn config(dir: &Path) -> Config {
    Config {
        sampling_rate_hz: Some(4),
        epoch_threshold: Duration::from_secs(2),
        min_window_secs: 1,
        max_window_secs: 2,
        seed: Some(11),
        pull_timeout_ms: 5,
        artifact_dir: dir.join("artifacts"),
        data_path: dir.join("out"),
        ..Config::default()
    }
}

fn recorder(config: &Config) -> CsvRecorder {
    CsvRecorder::new(
        config.samples_path(),
        config.marks_path(),
        config.channels.headers(),
    )
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

/// Queue `count` samples at 4 Hz with every raw channel set to `value`.
fn feed(count: i64, value: f64) -> (Sender<Sample>, ChannelSampleSource) {
    let info = StreamInfo {
        name: "EEG".to_string(),
        channel_count: 8,
        nominal_srate: 4.0,
    };
    let (tx, source) = ChannelSampleSource::bounded(info, 4096);
    for i in 0..count {
        tx.send(Sample::new(
            t0() + ChronoDuration::milliseconds(i * 250),
            vec![value; 8],
        ))
        .unwrap();
    }
    (tx, source)
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_positive_majority_stops_session_and_writes_files() {
    let dir = TestDir::new();
    let config = config(dir.path());
    std::fs::create_dir_all(&config.artifact_dir).unwrap();
    write_artifacts(&config.artifact_dir);

    let (_tx, source) = feed(40, 100.0);
    let outcome = run_session(
        &config,
        source,
        None,
        recorder(&config),
        Arc::new(AtomicBool::new(false)),
        create_shared_log(),
    )
    .unwrap();

    assert_eq!(outcome.reason, TerminationReason::Verdict);
    assert_eq!(outcome.epochs_evaluated, 1);
    let evaluation = outcome.last_evaluation.unwrap();
    assert_eq!(evaluation.mode, "Excited");
    assert_eq!(evaluation.verdict, Verdict::Terminate);

    let samples = read_lines(&config.samples_path());
    assert_eq!(samples[0], "timestamp,ch3,ch4,ch5,ch7");
    // Readings up to and including the first one past the 2 s epoch.
    assert_eq!(samples.len(), 1 + 10);
    assert!(samples[1].starts_with("2024-03-01T09:00:00"));
    assert!(samples[1].ends_with(",100,100,100,100"));

    assert_eq!(read_lines(&config.marks_path()), vec!["time_since_last_down"]);
}

#[test]
fn test_negative_majority_keeps_collecting_until_cap() {
    let dir = TestDir::new();
    let mut config = config(dir.path());
    config.session_cap = Some(Duration::from_secs(5));
    std::fs::create_dir_all(&config.artifact_dir).unwrap();
    write_artifacts(&config.artifact_dir);

    let (_tx, source) = feed(40, 1.0);
    let outcome = run_session(
        &config,
        source,
        None,
        recorder(&config),
        Arc::new(AtomicBool::new(false)),
        create_shared_log(),
    )
    .unwrap();

    assert_eq!(outcome.reason, TerminationReason::SessionCap);
    assert_eq!(outcome.epochs_evaluated, 2);
    assert_eq!(outcome.last_evaluation.unwrap().mode, "Calm");
    // 0 s through 5 s inclusive at 4 Hz.
    assert_eq!(outcome.samples_recorded, 21);
    assert_eq!(read_lines(&config.samples_path()).len(), 1 + 21);
}

#[test]
fn test_elapsed_policy_needs_no_artifacts() {
    let dir = TestDir::new();
    let mut config = config(dir.path());
    config.stop_policy = StopPolicy::Elapsed;

    let (_tx, source) = feed(40, 1.0);
    let outcome = run_session(
        &config,
        source,
        None,
        recorder(&config),
        Arc::new(AtomicBool::new(false)),
        create_shared_log(),
    )
    .unwrap();

    assert_eq!(outcome.reason, TerminationReason::EpochElapsed);
    assert_eq!(outcome.epochs_evaluated, 0);
    assert!(outcome.last_evaluation.is_none());
    assert_eq!(outcome.samples_recorded, 10);
}

#[test]
fn test_key_presses_are_recorded_as_marks() {
    let dir = TestDir::new();
    let mut config = config(dir.path());
    config.stop_policy = StopPolicy::Elapsed;

    let key = KeyId::new("Down");
    let (key_tx, key_rx) = unbounded();
    let first = Utc::now() + ChronoDuration::seconds(1);
    let second = first + ChronoDuration::milliseconds(2500);
    key_tx.send(KeyEvent::down(first, &key)).unwrap();
    // Auto-repeat while held is not a new press.
    key_tx
        .send(KeyEvent::down(first + ChronoDuration::milliseconds(500), &key))
        .unwrap();
    key_tx.send(KeyEvent::up(first + ChronoDuration::seconds(1), &key)).unwrap();
    key_tx.send(KeyEvent::down(second, &KeyId::new("up"))).unwrap();
    key_tx.send(KeyEvent::down(second, &key)).unwrap();

    let (_tx, source) = feed(40, 1.0);
    let outcome = run_session(
        &config,
        source,
        Some(key_rx),
        recorder(&config),
        Arc::new(AtomicBool::new(false)),
        create_shared_log(),
    )
    .unwrap();
    drop(key_tx);

    assert_eq!(outcome.marks_recorded, 2);
    let marks = read_lines(&config.marks_path());
    assert_eq!(marks.len(), 3);
    assert_eq!(marks[0], "time_since_last_down");
    assert_eq!(marks[2], "2.5");
}

#[test]
fn test_source_loss_still_flushes() {
    let dir = TestDir::new();
    let config = config(dir.path());
    std::fs::create_dir_all(&config.artifact_dir).unwrap();
    write_artifacts(&config.artifact_dir);

    let (tx, source) = feed(5, 1.0);
    drop(tx);

    let err = run_session(
        &config,
        source,
        None,
        recorder(&config),
        Arc::new(AtomicBool::new(false)),
        create_shared_log(),
    )
    .unwrap_err();

    assert!(matches!(err, SessionError::SourceUnavailable(_)));
    assert_eq!(read_lines(&config.samples_path()).len(), 1 + 5);
}

#[test]
fn test_missing_artifacts_fail_before_collecting() {
    let dir = TestDir::new();
    let config = config(dir.path());

    let (_tx, source) = feed(5, 1.0);
    let err = run_session(
        &config,
        source,
        None,
        recorder(&config),
        Arc::new(AtomicBool::new(false)),
        create_shared_log(),
    )
    .unwrap_err();

    assert!(matches!(err, SessionError::ArtifactLoad(_)));
    assert!(!config.samples_path().exists());
}

#[test]
fn test_zero_signal_window_has_neutral_ratios() {
    let segmenter = WindowSegmenter::new(4, 3, 3);
    let buffer = vec![ChannelValues::default(); 12];
    let windows = segmenter.segment(&buffer, &mut StdRng::seed_from_u64(1));
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].duration_secs, 3.0);

    let features = compute_all(&windows);
    let map = features[0].to_map();
    assert_eq!(map.len(), FEATURE_NAMES.len());
    assert_eq!(map["frontal_ratio"], 1.0);
    assert_eq!(map["temporal_parietal_ratio"], 1.0);
    assert!(features[0].is_finite());
}
