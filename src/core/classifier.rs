//! Inference over pretrained artifacts and the majority-vote decision.
//!
//! The classifier assembles feature vectors into a matrix whose column order
//! comes from the scaler artifact, standardizes it, asks the model for one
//! label per row and reduces the labels to a single verdict.

use crate::core::features::{feature_index, FeatureVector};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name of the scaler artifact inside the artifact directory.
pub const SCALER_FILE: &str = "scaler.json";

/// File name of the model artifact inside the artifact directory.
pub const MODEL_FILE: &str = "model.json";

/// Errors loading or reconciling the pretrained artifacts.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("cannot read artifact {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse artifact {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("incompatible artifact: {0}")]
    Incompatible(String),
}

/// Errors raised while classifying a batch.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier invoked with no windows")]
    InsufficientData,
    #[error("model failure: {0}")]
    Model(String),
}

/// Whether standardization statistics come from the artifact or the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalerPolicy {
    /// Use the pretrained mean and scale.
    #[default]
    Pretrained,
    /// Fit mean and scale on each batch. Unstable on small batches.
    RefitPerBatch,
}

/// Per-column standardization statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scaler {
    pub feature_names: Vec<String>,
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let scaler: Scaler = read_json(path)?;
        scaler.validate()?;
        Ok(scaler)
    }

    /// Fit on a batch, with population standard deviation. Constant columns
    /// get a scale of 1.
    pub fn fit(feature_names: Vec<String>, rows: &[Vec<f64>]) -> Self {
        let columns = feature_names.len();
        let mut mean = Vec::with_capacity(columns);
        let mut scale = Vec::with_capacity(columns);

        for c in 0..columns {
            let column: Vec<f64> = rows.iter().map(|row| row[c]).collect();
            mean.push(column.iter().mean());
            let std = column.iter().population_std_dev();
            scale.push(if std.is_finite() && std > 0.0 { std } else { 1.0 });
        }

        Self {
            feature_names,
            mean,
            scale,
        }
    }

    fn validate(&self) -> Result<(), ArtifactError> {
        let n = self.feature_names.len();
        if n == 0 {
            return Err(ArtifactError::Incompatible("scaler has no columns".to_string()));
        }
        if self.mean.len() != n || self.scale.len() != n {
            return Err(ArtifactError::Incompatible(format!(
                "scaler has {n} names but {} means and {} scales",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if let Some(i) = self
            .scale
            .iter()
            .position(|s| !s.is_finite() || *s == 0.0)
        {
            return Err(ArtifactError::Incompatible(format!(
                "scaler column '{}' has unusable scale {}",
                self.feature_names[i], self.scale[i]
            )));
        }
        Ok(())
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s)
            .collect()
    }
}

/// A pretrained model mapping standardized rows to categorical labels.
pub trait Model: Send {
    /// Column names the model was trained on, in order.
    fn feature_names(&self) -> &[String];

    /// Labels the model can emit.
    fn classes(&self) -> &[String];

    /// One label per row.
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<String>, ClassifierError>;
}

/// One node of a decision tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    /// Go to `left` when `row[feature] <= threshold`, else `right`.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Per-class weights (counts or probabilities).
    Leaf { value: Vec<f64> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn leaf_for(&self, row: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
                TreeNode::Leaf { value } => return value,
            }
        }
    }
}

/// Decision-forest model read from a JSON artifact.
///
/// Prediction averages each tree's normalized leaf distribution and returns
/// the class with the highest mean weight, the first one on ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestModel {
    pub feature_names: Vec<String>,
    pub classes: Vec<String>,
    pub trees: Vec<DecisionTree>,
}

impl ForestModel {
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let model: ForestModel = read_json(path)?;
        model.validate()?;
        Ok(model)
    }

    /// Check tree structure. Children must come after their parent so
    /// traversal always reaches a leaf.
    fn validate(&self) -> Result<(), ArtifactError> {
        if self.classes.is_empty() {
            return Err(ArtifactError::Incompatible("model has no classes".to_string()));
        }
        if self.trees.is_empty() {
            return Err(ArtifactError::Incompatible("model has no trees".to_string()));
        }

        let n_features = self.feature_names.len();
        for (t, tree) in self.trees.iter().enumerate() {
            if tree.nodes.is_empty() {
                return Err(ArtifactError::Incompatible(format!("tree {t} is empty")));
            }
            for (i, node) in tree.nodes.iter().enumerate() {
                match node {
                    TreeNode::Split {
                        feature,
                        left,
                        right,
                        ..
                    } => {
                        let children_ok = [*left, *right]
                            .iter()
                            .all(|&c| c > i && c < tree.nodes.len());
                        if *feature >= n_features || !children_ok {
                            return Err(ArtifactError::Incompatible(format!(
                                "tree {t} node {i} is out of range"
                            )));
                        }
                    }
                    TreeNode::Leaf { value } => {
                        if value.len() != self.classes.len() {
                            return Err(ArtifactError::Incompatible(format!(
                                "tree {t} leaf {i} has {} weights for {} classes",
                                value.len(),
                                self.classes.len()
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> usize {
        let mut totals = vec![0.0; self.classes.len()];
        for tree in &self.trees {
            let leaf = tree.leaf_for(row);
            let sum: f64 = leaf.iter().sum();
            if sum > 0.0 {
                for (total, weight) in totals.iter_mut().zip(leaf) {
                    *total += weight / sum;
                }
            }
        }

        let mut best = 0;
        for (i, total) in totals.iter().enumerate() {
            if *total > totals[best] {
                best = i;
            }
        }
        best
    }
}

impl Model for ForestModel {
    fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    fn classes(&self) -> &[String] {
        &self.classes
    }

    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<String>, ClassifierError> {
        rows.iter()
            .map(|row| {
                if row.len() != self.feature_names.len() {
                    return Err(ClassifierError::Model(format!(
                        "row has {} columns, model expects {}",
                        row.len(),
                        self.feature_names.len()
                    )));
                }
                Ok(self.classes[self.predict_row(row)].clone())
            })
            .collect()
    }
}

/// Session-level decision for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Continue,
    Terminate,
}

impl Verdict {
    pub fn is_terminate(&self) -> bool {
        matches!(self, Verdict::Terminate)
    }
}

/// Result of classifying one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    /// One label per window, in window order
    pub labels: Vec<String>,
    /// Most frequent label
    pub mode: String,
    pub verdict: Verdict,
}

/// Most frequent label; ties go to the lexically lowest label.
pub fn mode_label(labels: &[String]) -> Option<&str> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label.as_str()).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (label, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

/// Pretrained scaler and model plus the positive class.
pub struct Classifier {
    scaler: Scaler,
    columns: Vec<usize>,
    model: Box<dyn Model>,
    positive_label: String,
    policy: ScalerPolicy,
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifier")
            .field("columns", &self.scaler.feature_names)
            .field("classes", &self.model.classes())
            .field("positive_label", &self.positive_label)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Classifier {
    /// Reconcile a scaler and a model.
    ///
    /// Fails when a column is not a known feature, when scaler and model
    /// disagree on columns, or when the model cannot emit `positive_label`.
    pub fn new(
        scaler: Scaler,
        model: Box<dyn Model>,
        positive_label: impl Into<String>,
        policy: ScalerPolicy,
    ) -> Result<Self, ArtifactError> {
        let positive_label = positive_label.into();
        scaler.validate()?;

        let columns = scaler
            .feature_names
            .iter()
            .map(|name| {
                feature_index(name).ok_or_else(|| {
                    ArtifactError::Incompatible(format!("unknown feature column '{name}'"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        if model.feature_names() != scaler.feature_names.as_slice() {
            return Err(ArtifactError::Incompatible(
                "scaler and model column orders differ".to_string(),
            ));
        }
        if !model.classes().iter().any(|c| *c == positive_label) {
            return Err(ArtifactError::Incompatible(format!(
                "model cannot emit positive class '{positive_label}' (classes: {:?})",
                model.classes()
            )));
        }

        Ok(Self {
            scaler,
            columns,
            model,
            positive_label,
            policy,
        })
    }

    /// Load `scaler.json` and `model.json` from an artifact directory.
    pub fn load(
        artifact_dir: &Path,
        positive_label: impl Into<String>,
        policy: ScalerPolicy,
    ) -> Result<Self, ArtifactError> {
        let scaler = Scaler::load(&artifact_dir.join(SCALER_FILE))?;
        let model = ForestModel::load(&artifact_dir.join(MODEL_FILE))?;
        Self::new(scaler, Box::new(model), positive_label, policy)
    }

    pub fn positive_label(&self) -> &str {
        &self.positive_label
    }

    pub fn feature_names(&self) -> &[String] {
        &self.scaler.feature_names
    }

    /// Classify a batch of windows and reduce to a verdict.
    pub fn evaluate(&self, vectors: &[FeatureVector]) -> Result<Evaluation, ClassifierError> {
        if vectors.is_empty() {
            return Err(ClassifierError::InsufficientData);
        }

        let matrix: Vec<Vec<f64>> = vectors
            .iter()
            .map(|v| {
                let values = v.as_slice();
                self.columns.iter().map(|&i| values[i]).collect()
            })
            .collect();

        let scaled: Vec<Vec<f64>> = match self.policy {
            ScalerPolicy::Pretrained => matrix.iter().map(|r| self.scaler.transform(r)).collect(),
            ScalerPolicy::RefitPerBatch => {
                let fitted = Scaler::fit(self.scaler.feature_names.clone(), &matrix);
                matrix.iter().map(|r| fitted.transform(r)).collect()
            }
        };

        let labels = self.model.predict(&scaled)?;
        if labels.len() != vectors.len() {
            return Err(ClassifierError::Model(format!(
                "model returned {} labels for {} rows",
                labels.len(),
                vectors.len()
            )));
        }

        let mode = mode_label(&labels)
            .ok_or(ClassifierError::InsufficientData)?
            .to_string();
        let verdict = if mode == self.positive_label {
            Verdict::Terminate
        } else {
            Verdict::Continue
        };

        Ok(Evaluation {
            labels,
            mode,
            verdict,
        })
    }

    pub fn classify(&self, vectors: &[FeatureVector]) -> Result<Verdict, ClassifierError> {
        self.evaluate(vectors).map(|e| e.verdict)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let content = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::ChannelValues;
    use crate::core::features::compute_features;
    use crate::core::windowing::Window;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn labels(list: &[&str]) -> Vec<String> {
        names(list)
    }

    /// Single stump on the first column: <= 0 is "Calm", else "Excited".
    fn stump_model(columns: &[&str]) -> ForestModel {
        ForestModel {
            feature_names: names(columns),
            classes: names(&["Calm", "Excited"]),
            trees: vec![DecisionTree {
                nodes: vec![
                    TreeNode::Split {
                        feature: 0,
                        threshold: 0.0,
                        left: 1,
                        right: 2,
                    },
                    TreeNode::Leaf {
                        value: vec![1.0, 0.0],
                    },
                    TreeNode::Leaf {
                        value: vec![0.0, 1.0],
                    },
                ],
            }],
        }
    }

    fn identity_scaler(columns: &[&str]) -> Scaler {
        Scaler {
            feature_names: names(columns),
            mean: vec![0.0; columns.len()],
            scale: vec![1.0; columns.len()],
        }
    }

    fn vector(af3: f64) -> FeatureVector {
        compute_features(&Window {
            duration_secs: 2.0,
            means: ChannelValues::new(af3, 1.0, 1.0, 1.0),
        })
    }

    struct CountingModel {
        calls: Arc<AtomicUsize>,
        names: Vec<String>,
        classes: Vec<String>,
    }

    impl Model for CountingModel {
        fn feature_names(&self) -> &[String] {
            &self.names
        }
        fn classes(&self) -> &[String] {
            &self.classes
        }
        fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<String>, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec!["Calm".to_string(); rows.len()])
        }
    }

    #[test]
    fn test_mode_tie_breaks_lexically() {
        assert_eq!(mode_label(&labels(&["b", "a", "b", "a"])), Some("a"));
        assert_eq!(mode_label(&labels(&["Excited", "Calm"])), Some("Calm"));
        assert_eq!(mode_label(&labels(&["x", "y", "y"])), Some("y"));
        assert_eq!(mode_label(&[]), None);
    }

    #[test]
    fn test_majority_positive_terminates() {
        let classifier = Classifier::new(
            identity_scaler(&["AF3"]),
            Box::new(stump_model(&["AF3"])),
            "Excited",
            ScalerPolicy::Pretrained,
        )
        .unwrap();

        let eval = classifier
            .evaluate(&[vector(1.0), vector(2.0), vector(-1.0)])
            .unwrap();
        assert_eq!(eval.labels, labels(&["Excited", "Excited", "Calm"]));
        assert_eq!(eval.mode, "Excited");
        assert_eq!(eval.verdict, Verdict::Terminate);

        let verdict = classifier.classify(&[vector(-1.0), vector(-2.0)]).unwrap();
        assert_eq!(verdict, Verdict::Continue);
    }

    #[test]
    fn test_pretrained_scaler_shifts_threshold() {
        // Mean 5 moves the stump boundary to AF3 == 5.
        let scaler = Scaler {
            feature_names: names(&["AF3"]),
            mean: vec![5.0],
            scale: vec![2.0],
        };
        let classifier = Classifier::new(
            scaler,
            Box::new(stump_model(&["AF3"])),
            "Excited",
            ScalerPolicy::Pretrained,
        )
        .unwrap();

        assert_eq!(classifier.classify(&[vector(4.0)]).unwrap(), Verdict::Continue);
        assert_eq!(classifier.classify(&[vector(6.0)]).unwrap(), Verdict::Terminate);
    }

    #[test]
    fn test_refit_policy_centres_each_batch() {
        let classifier = Classifier::new(
            identity_scaler(&["AF3"]),
            Box::new(stump_model(&["AF3"])),
            "Excited",
            ScalerPolicy::RefitPerBatch,
        )
        .unwrap();

        // Centred on its own mean, 10 and 20 split into Calm/Excited; tie -> Calm.
        let eval = classifier.evaluate(&[vector(10.0), vector(20.0)]).unwrap();
        assert_eq!(eval.labels, labels(&["Calm", "Excited"]));
        assert_eq!(eval.verdict, Verdict::Continue);
    }

    #[test]
    fn test_empty_batch_is_insufficient_and_skips_model() {
        let calls = Arc::new(AtomicUsize::new(0));
        let model = CountingModel {
            calls: calls.clone(),
            names: names(&["AF3"]),
            classes: names(&["Calm", "Excited"]),
        };
        let classifier = Classifier::new(
            identity_scaler(&["AF3"]),
            Box::new(model),
            "Excited",
            ScalerPolicy::Pretrained,
        )
        .unwrap();

        let err = classifier.evaluate(&[]).unwrap_err();
        assert!(matches!(err, ClassifierError::InsufficientData));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let err = Classifier::new(
            identity_scaler(&["alpha_power"]),
            Box::new(stump_model(&["alpha_power"])),
            "Excited",
            ScalerPolicy::Pretrained,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Incompatible(_)));
    }

    #[test]
    fn test_column_mismatch_is_rejected() {
        let err = Classifier::new(
            identity_scaler(&["AF3", "T7"]),
            Box::new(stump_model(&["T7", "AF3"])),
            "Excited",
            ScalerPolicy::Pretrained,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Incompatible(_)));
    }

    #[test]
    fn test_missing_positive_class_is_rejected() {
        let err = Classifier::new(
            identity_scaler(&["AF3"]),
            Box::new(stump_model(&["AF3"])),
            "Bored",
            ScalerPolicy::Pretrained,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::Incompatible(_)));
    }

    #[test]
    fn test_forest_rejects_backward_child() {
        let mut model = stump_model(&["AF3"]);
        model.trees[0].nodes[0] = TreeNode::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 2,
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_forest_json_round_trip_through_loader() {
        let dir = std::env::temp_dir().join(format!("synheart-eeg-artifacts-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(SCALER_FILE),
            serde_json::to_string(&identity_scaler(&["AF3"])).unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join(MODEL_FILE),
            r#"{
                "feature_names": ["AF3"],
                "classes": ["Calm", "Excited"],
                "trees": [{"nodes": [
                    {"feature": 0, "threshold": 0.0, "left": 1, "right": 2},
                    {"value": [3.0, 1.0]},
                    {"value": [0.0, 4.0]}
                ]}]
            }"#,
        )
        .unwrap();

        let classifier = Classifier::load(&dir, "Excited", ScalerPolicy::Pretrained).unwrap();
        assert_eq!(classifier.classify(&[vector(0.5)]).unwrap(), Verdict::Terminate);

        let missing = Classifier::load(&dir.join("nope"), "Excited", ScalerPolicy::Pretrained);
        assert!(matches!(missing, Err(ArtifactError::Io { .. })));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
