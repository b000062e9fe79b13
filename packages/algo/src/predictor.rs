//! Success prediction from mastery counters

use std::collections::BTreeMap;

use crate::mastery::{MasteryNode, MasteryStore};
use crate::types::{FactFamily, TargetBand, MIN_PREDICTED_SUCCESS};

/// Key of the aggregate entry in a mastery snapshot
pub const SNAPSHOT_AGGREGATE_KEY: &str = "add_within_10";

/// Predicted probability of answering a family correctly
///
/// `alpha / (alpha + beta)` clamped to `[0.05, band.max + 0.05]`. A family
/// never seen before predicts the band midpoint.
pub fn predict_success(node: Option<&MasteryNode>, band: &TargetBand) -> f64 {
    let raw = match node {
        Some(node) => {
            let alpha = sanitize_counter(node.alpha);
            let beta = sanitize_counter(node.beta);
            let sum = alpha + beta;
            if sum > 0.0 {
                alpha / sum
            } else {
                band.midpoint
            }
        }
        None => band.midpoint,
    };
    raw.clamp(MIN_PREDICTED_SUCCESS, band.ceiling())
}

pub fn predict_family(store: &MasteryStore, family: FactFamily, band: &TargetBand) -> f64 {
    predict_success(store.get(family), band)
}

/// Per-family predictions rounded to 3 decimals, plus the mean under
/// [`SNAPSHOT_AGGREGATE_KEY`] when any family is tracked
pub fn mastery_snapshot(store: &MasteryStore, band: &TargetBand) -> BTreeMap<String, f64> {
    let mut snapshot = BTreeMap::new();
    let mut total = 0.0;
    for (family, node) in store.iter() {
        let value = round3(predict_success(Some(node), band).clamp(0.0, 1.0));
        total += value;
        snapshot.insert(family.key(), value);
    }
    let count = snapshot.len();
    if count > 0 {
        snapshot.insert(SNAPSHOT_AGGREGATE_KEY.to_string(), round3(total / count as f64));
    }
    snapshot
}

/// The `n` tracked families with the lowest predicted success
pub fn weakest_families(store: &MasteryStore, band: &TargetBand, n: usize) -> Vec<FactFamily> {
    let mut ranked: Vec<(FactFamily, f64)> = store
        .iter()
        .map(|(family, node)| (family, predict_success(Some(node), band)))
        .collect();
    ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().take(n).map(|(family, _)| family).collect()
}

fn sanitize_counter(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
