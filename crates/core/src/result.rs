use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single named score: one value per computation, or one per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScoreValue {
    Scalar(f64),
    Series(Vec<f64>),
}

pub type Scores = BTreeMap<String, ScoreValue>;

/// The finished, cacheable outcome of running one computation on one
/// asset. The orchestration never interprets `scores`; it only creates,
/// caches and post-processes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResult {
    pub computation_id: String,
    pub asset_string: String,
    pub scores: Scores,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_value_serializes_untagged() {
        let scalar = serde_json::to_string(&ScoreValue::Scalar(0.25)).expect("serialize scalar");
        assert_eq!(scalar, "0.25");

        let series =
            serde_json::to_string(&ScoreValue::Series(vec![1.0, 2.0])).expect("serialize series");
        assert_eq!(series, "[1.0,2.0]");
    }

    #[test]
    fn metric_result_roundtrips_through_json() {
        let mut scores = Scores::new();
        scores.insert("quality".to_string(), ScoreValue::Scalar(0.91));
        scores.insert(
            "quality_per_frame".to_string(),
            ScoreValue::Series(vec![0.9, 0.92]),
        );

        let original = MetricResult {
            computation_id: "psnr_V1.0".to_string(),
            asset_string: "ref_a_vs_dis_b".to_string(),
            scores,
        };

        let encoded = serde_json::to_string(&original).expect("serialize result");
        let decoded: MetricResult = serde_json::from_str(&encoded).expect("deserialize result");
        assert_eq!(decoded, original);
    }
}
