//! Risk scorer: combines an anomaly score and a supervised score
//! into a single risk score, with per-feature explanation.
//!
//! Model blobs load from a [`crate::collab::ModelRepository`] at startup
//! and reload atomically on a control-plane signal; a model that fails to
//! load leaves the previously loaded version active. If no version has
//! ever loaded, scoring returns a degraded neutral score of 0.5 with a
//! `MODEL_UNAVAILABLE` explanation entry, rather than failing the request.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::domain::{FeatureContribution, FeatureVector};

pub trait AnomalyModel: Send + Sync {
    fn score(&self, features: &FeatureVector) -> f64;
    fn version(&self) -> String;
}

pub trait SupervisedModel: Send + Sync {
    fn score(&self, features: &FeatureVector) -> f64;
    fn feature_importance(&self, feature: &str) -> f64;
    fn version(&self) -> String;
}

/// A simple linear model: each named feature carries a fixed weight; the
/// score is the clamped weighted sum. Stands in for a real trained model
/// while still exercising the reload/explanation machinery faithfully.
pub struct LinearModel {
    pub name: String,
    pub version: String,
    pub weights: Vec<(String, f64)>,
    pub bias: f64,
}

impl LinearModel {
    fn raw_score(&self, features: &FeatureVector) -> f64 {
        let mut total = self.bias;
        for (feature, weight) in &self.weights {
            if let Some(value) = features.get(feature) {
                total += value * weight;
            }
        }
        1.0 / (1.0 + (-total).exp())
    }
}

impl AnomalyModel for LinearModel {
    fn score(&self, features: &FeatureVector) -> f64 {
        self.raw_score(features).clamp(0.0, 1.0)
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

impl SupervisedModel for LinearModel {
    fn score(&self, features: &FeatureVector) -> f64 {
        self.raw_score(features).clamp(0.0, 1.0)
    }

    fn feature_importance(&self, feature: &str) -> f64 {
        self.weights.iter().find(|(name, _)| name == feature).map(|(_, w)| w.abs()).unwrap_or(0.0)
    }

    fn version(&self) -> String {
        self.version.clone()
    }
}

/// The anomaly and supervised slots reload independently (the Model
/// Repository collaborator's `subscribe` fires per model name): a failed or
/// not-yet-delivered reload of one leaves the other's previously loaded
/// version active rather than tearing down the whole pair.
pub struct RiskScorer {
    anomaly: ArcSwap<Option<Arc<dyn AnomalyModel>>>,
    supervised: ArcSwap<Option<Arc<dyn SupervisedModel>>>,
    anomaly_weight: f64,
    explanation_top_k: usize,
}

pub struct ScoredRisk {
    pub risk_score: f64,
    pub anomaly_component: f64,
    pub supervised_component: f64,
    pub model_version: String,
    pub explanation: Vec<FeatureContribution>,
}

impl RiskScorer {
    pub fn new(anomaly_weight: f64) -> Self {
        Self {
            anomaly: ArcSwap::new(Arc::new(None)),
            supervised: ArcSwap::new(Arc::new(None)),
            anomaly_weight,
            explanation_top_k: 5,
        }
    }

    /// Atomically replaces the active anomaly model. Called from the
    /// Model Repository's `subscribe("anomaly", ..)` callback as well as
    /// at startup load.
    pub fn reload_anomaly(&self, model: Arc<dyn AnomalyModel>) {
        self.anomaly.store(Arc::new(Some(model)));
    }

    /// Atomically replaces the active supervised model. Called from the
    /// Model Repository's `subscribe("supervised", ..)` callback as well
    /// as at startup load.
    pub fn reload_supervised(&self, model: Arc<dyn SupervisedModel>) {
        self.supervised.store(Arc::new(Some(model)));
    }

    /// Convenience for tests/fakes that load both at once.
    pub fn reload(&self, anomaly: Arc<dyn AnomalyModel>, supervised: Arc<dyn SupervisedModel>) {
        self.reload_anomaly(anomaly);
        self.reload_supervised(supervised);
    }

    pub fn score(&self, features: &FeatureVector) -> ScoredRisk {
        let anomaly = self.anomaly.load();
        let supervised = self.supervised.load();
        let (Some(anomaly), Some(supervised)) = (anomaly.as_ref(), supervised.as_ref()) else {
            return ScoredRisk {
                risk_score: 0.5,
                anomaly_component: 0.5,
                supervised_component: 0.5,
                model_version: "none".to_string(),
                explanation: vec![FeatureContribution { feature: "MODEL_UNAVAILABLE".to_string(), weight: 0.0 }],
            };
        };

        let anomaly_component = anomaly.score(features);
        let supervised_component = supervised.score(features);
        let risk_score = self.anomaly_weight * anomaly_component + (1.0 - self.anomaly_weight) * supervised_component;

        let mut contributions: Vec<FeatureContribution> = features
            .features
            .iter()
            .map(|(name, _)| {
                let importance = supervised.feature_importance(name);
                let weight = (importance * supervised_component * 10_000.0).round() / 10_000.0;
                FeatureContribution { feature: name.clone(), weight }
            })
            .collect();
        contributions.sort_by(|a, b| b.weight.abs().partial_cmp(&a.weight.abs()).unwrap_or(std::cmp::Ordering::Equal));
        contributions.truncate(self.explanation_top_k);

        ScoredRisk {
            risk_score: risk_score.clamp(0.0, 1.0),
            anomaly_component,
            supervised_component,
            model_version: format!("{}/{}", anomaly.version(), supervised.version()),
            explanation: contributions,
        }
    }
}

/// Deserializes a [`crate::collab::ModelBlob`] as a `LinearModel` spec:
/// `{"version": "...", "bias": 0.0, "weights": [["feature", 0.5], ...]}`.
/// Stands in for whatever real serialization a trained model uses, while
/// still exercising the load/reload contract faithfully.
#[derive(serde::Deserialize)]
struct LinearModelSpec {
    version: String,
    bias: f64,
    weights: Vec<(String, f64)>,
}

impl LinearModel {
    pub fn from_blob(blob: &crate::collab::ModelBlob) -> anyhow::Result<Self> {
        let spec: LinearModelSpec = serde_json::from_slice(&blob.bytes)?;
        Ok(LinearModel { name: blob.model_name.clone(), version: spec.version, weights: spec.weights, bias: spec.bias })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FeatureVector;

    fn features() -> FeatureVector {
        FeatureVector {
            transaction_fingerprint: "fp".to_string(),
            schema_version: 1,
            features: vec![("amount".to_string(), 500.0), ("velocity_score".to_string(), 0.9)],
        }
    }

    #[test]
    fn returns_neutral_score_when_no_model_loaded() {
        let scorer = RiskScorer::new(0.4);
        let result = scorer.score(&features());
        assert_eq!(result.risk_score, 0.5);
        assert_eq!(result.explanation[0].feature, "MODEL_UNAVAILABLE");
    }

    #[test]
    fn combines_anomaly_and_supervised_with_configured_weight() {
        let scorer = RiskScorer::new(0.4);
        let model = Arc::new(LinearModel {
            name: "m".to_string(),
            version: "v1".to_string(),
            weights: vec![("velocity_score".to_string(), 5.0)],
            bias: 0.0,
        });
        scorer.reload(model.clone(), model.clone());
        let result = scorer.score(&features());
        assert!(result.risk_score > 0.0 && result.risk_score <= 1.0);
        assert_eq!(result.explanation.len(), 2);
    }
}
