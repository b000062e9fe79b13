//! Common Types and Constants
//!
//! Shared data structures used across all algorithm modules.

use serde::{Deserialize, Serialize};
use std::fmt;

// ==================== Constants ====================

/// Largest single-digit addend
pub const MAX_ADDEND: u8 = 9;

/// Largest fact family (9 + 9)
pub const MAX_FAMILY: u8 = MAX_ADDEND * 2;

/// Prior floor for Beta counters
pub const MASTERY_PRIOR: f64 = 1.0;

/// Lower bound of any success prediction
pub const MIN_PREDICTED_SUCCESS: f64 = 0.05;

/// Headroom allowed above the band maximum
pub const PREDICTION_HEADROOM: f64 = 0.05;

/// Families predicted at or above this are challenge material
pub const CHALLENGE_THRESHOLD: f64 = 0.93;

// ==================== Target Band ====================

/// Success-rate band the planner aims for
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetBand {
    pub min: f64,
    pub max: f64,
    pub midpoint: f64,
}

impl TargetBand {
    pub fn new(min: f64, max: f64) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let lo = lo.clamp(0.0, 1.0);
        let hi = hi.clamp(0.0, 1.0);
        Self {
            min: lo,
            max: hi,
            midpoint: (lo + hi) / 2.0,
        }
    }

    /// Upper clamp used by the predictor
    pub fn ceiling(&self) -> f64 {
        (self.max + PREDICTION_HEADROOM).min(1.0)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Clamp a requested target success into the band
    pub fn clamp_target(&self, value: f64) -> f64 {
        if value.is_finite() {
            value.clamp(self.min, self.max)
        } else {
            self.midpoint
        }
    }
}

impl Default for TargetBand {
    fn default() -> Self {
        Self::new(0.80, 0.90)
    }
}

// ==================== Facts ====================

/// A single addition fact `a + b`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdditionFact {
    pub a: u8,
    pub b: u8,
}

impl AdditionFact {
    pub fn new(a: u8, b: u8) -> Self {
        Self { a, b }
    }

    pub fn answer(&self) -> u8 {
        self.a + self.b
    }

    pub fn family(&self) -> FactFamily {
        FactFamily(self.answer())
    }

    /// History key, e.g. `"3+4"`
    pub fn key(&self) -> String {
        format!("{}+{}", self.a, self.b)
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let (a, b) = key.split_once('+')?;
        let a: u8 = a.trim().parse().ok()?;
        let b: u8 = b.trim().parse().ok()?;
        if a > MAX_ADDEND || b > MAX_ADDEND {
            return None;
        }
        Some(Self { a, b })
    }

    pub fn within_limit(&self, limit: u8) -> bool {
        self.a <= limit && self.b <= limit
    }
}

impl fmt::Display for AdditionFact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} + {}", self.a, self.b)
    }
}

/// Fact family: every fact sharing the same sum
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactFamily(pub u8);

impl FactFamily {
    pub fn sum(&self) -> u8 {
        self.0
    }

    /// Storage key, e.g. `"sum=7"`
    pub fn key(&self) -> String {
        format!("sum={}", self.0)
    }

    pub fn parse_key(key: &str) -> Option<Self> {
        let raw = key.strip_prefix("sum=").unwrap_or(key);
        let sum: u8 = raw.trim().parse().ok()?;
        (sum <= MAX_FAMILY).then_some(Self(sum))
    }

    pub fn all() -> impl Iterator<Item = FactFamily> {
        (0..=MAX_FAMILY).map(FactFamily)
    }

    /// Facts in this family whose addends both stay within `limit`
    pub fn facts_within(&self, limit: u8) -> Vec<AdditionFact> {
        let limit = limit.min(MAX_ADDEND);
        (0..=limit)
            .filter_map(|a| {
                let b = self.0.checked_sub(a)?;
                (b <= limit).then_some(AdditionFact::new(a, b))
            })
            .collect()
    }
}

// ==================== Plan Items ====================

/// Why an item was chosen for a session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanRole {
    Weak,
    Review,
    Challenge,
    #[default]
    Balanced,
}

impl PlanRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanRole::Weak => "weak",
            PlanRole::Review => "review",
            PlanRole::Challenge => "challenge",
            PlanRole::Balanced => "balanced",
        }
    }
}

/// One practice item in a generated plan
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlanItem {
    pub id: String,
    pub a: u8,
    pub b: u8,
    pub answer: u8,
    pub role: PlanRole,
    pub predicted_success: f64,
    pub display: String,
    pub source: String,
    pub plan_id: String,
}

impl PlanItem {
    pub fn fact(&self) -> AdditionFact {
        AdditionFact::new(self.a, self.b)
    }
}

// ==================== History ====================

/// Per-fact attempt history, keyed by `"a+b"`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProblemHistory {
    pub attempts: u32,
    pub correct: u32,
    pub total_time_ms: u64,
    pub last_attempt: Option<i64>,
}

impl ProblemHistory {
    pub fn accuracy(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.correct as f64 / self.attempts as f64
        }
    }
}

/// One answered problem, newest last
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimelineEntry {
    pub ts: i64,
    pub a: u8,
    pub b: u8,
    pub correct: bool,
    pub time_sec: f64,
}

impl TimelineEntry {
    pub fn fact(&self) -> AdditionFact {
        AdditionFact::new(self.a, self.b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_defaults() {
        let band = TargetBand::default();
        assert!((band.midpoint - 0.85).abs() < 1e-9);
        assert!((band.ceiling() - 0.95).abs() < 1e-9);
        assert!(band.ceiling() > CHALLENGE_THRESHOLD);
    }

    #[test]
    fn test_band_swaps_inverted_bounds() {
        let band = TargetBand::new(0.9, 0.7);
        assert!(band.min < band.max);
        assert_eq!(band.clamp_target(0.95), band.max);
        assert_eq!(band.clamp_target(f64::NAN), band.midpoint);
    }

    #[test]
    fn test_fact_keys() {
        let fact = AdditionFact::new(3, 4);
        assert_eq!(fact.key(), "3+4");
        assert_eq!(AdditionFact::parse_key("3+4"), Some(fact));
        assert_eq!(AdditionFact::parse_key("12+1"), None);
        assert_eq!(fact.family().key(), "sum=7");
        assert_eq!(FactFamily::parse_key("sum=7"), Some(FactFamily(7)));
        assert_eq!(FactFamily::parse_key("sum=19"), None);
    }

    #[test]
    fn test_family_facts_respect_limit() {
        let facts = FactFamily(6).facts_within(3);
        assert_eq!(facts, vec![AdditionFact::new(3, 3)]);

        let facts = FactFamily(2).facts_within(9);
        assert_eq!(facts.len(), 3);
        assert!(FactFamily(18).facts_within(8).is_empty());
    }
}
