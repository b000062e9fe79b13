//! Per-addend mastery tracking
//!
//! Every answered fact `a + b` counts once for `a` and once for `b`. The level
//! is recomputed from accuracy after each attempt.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::MAX_ADDEND;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MasteryLevel {
    #[default]
    NotStarted,
    Learning,
    Proficient,
    Struggling,
    Mastered,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AddendMastery {
    pub level: MasteryLevel,
    pub total_attempts: u32,
    pub correct_attempts: u32,
    pub last_practiced: Option<i64>,
}

impl AddendMastery {
    /// Accuracy in percent, 0 when unseen
    pub fn percent(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.correct_attempts as f64 / self.total_attempts as f64 * 100.0
        }
    }

    pub fn update(&mut self, correct: bool, ts: i64) {
        self.total_attempts = self.total_attempts.saturating_add(1);
        if correct {
            self.correct_attempts = self.correct_attempts.saturating_add(1);
        }
        self.last_practiced = Some(ts);
        self.level = classify(self.percent(), self.total_attempts);
    }
}

fn classify(accuracy: f64, attempts: u32) -> MasteryLevel {
    if accuracy >= 90.0 && attempts >= 3 {
        MasteryLevel::Mastered
    } else if accuracy >= 70.0 && attempts >= 2 {
        MasteryLevel::Proficient
    } else if attempts >= 3 && accuracy < 60.0 {
        MasteryLevel::Struggling
    } else {
        MasteryLevel::Learning
    }
}

/// Addend (0..=9) -> tracking node
pub type AddendTracking = BTreeMap<u8, AddendMastery>;

/// Tracking table with a not-started node for every addend
pub fn default_tracking() -> AddendTracking {
    (0..=MAX_ADDEND).map(|addend| (addend, AddendMastery::default())).collect()
}

/// Apply one answered fact to both of its addends
pub fn record_fact(tracking: &mut AddendTracking, a: u8, b: u8, correct: bool, ts: i64) {
    for addend in [a, b] {
        if addend > MAX_ADDEND {
            continue;
        }
        tracking.entry(addend).or_default().update(correct, ts);
    }
}
