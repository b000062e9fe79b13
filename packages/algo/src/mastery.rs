//! Fact-family mastery store
//!
//! Each fact family (the sum of a fact, 0..=18) carries Beta counters:
//! - correct answer -> alpha + 1, streak + 1
//! - wrong answer   -> beta + 1, streak reset
//!
//! Counters never drop below [`MASTERY_PRIOR`], so a fresh family starts at
//! Beta(1, 1).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{AdditionFact, FactFamily, MASTERY_PRIOR};

/// Beta counters for one fact family
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MasteryNode {
    pub alpha: f64,
    pub beta: f64,
    pub streak: u32,
    pub last_asked_at: Option<i64>,
}

impl MasteryNode {
    pub fn new() -> Self {
        Self {
            alpha: MASTERY_PRIOR,
            beta: MASTERY_PRIOR,
            streak: 0,
            last_asked_at: None,
        }
    }

    /// Expected value of Beta(alpha, beta), unclamped
    pub fn mean(&self) -> f64 {
        let sum = self.alpha + self.beta;
        if sum > 0.0 && sum.is_finite() {
            self.alpha / sum
        } else {
            0.5
        }
    }

    /// Observations beyond the prior
    pub fn observations(&self) -> f64 {
        (self.alpha + self.beta - 2.0 * MASTERY_PRIOR).max(0.0)
    }

    pub fn observe(&mut self, correct: bool, ts: i64) {
        if correct {
            self.alpha += 1.0;
            self.streak = self.streak.saturating_add(1);
        } else {
            self.beta += 1.0;
            self.streak = 0;
        }
        self.last_asked_at = Some(ts);
    }

    /// Repair counters loaded from untrusted storage
    pub fn normalize(&mut self) {
        if !self.alpha.is_finite() || self.alpha < MASTERY_PRIOR {
            self.alpha = MASTERY_PRIOR;
        }
        if !self.beta.is_finite() || self.beta < MASTERY_PRIOR {
            self.beta = MASTERY_PRIOR;
        }
    }
}

impl Default for MasteryNode {
    fn default() -> Self {
        Self::new()
    }
}

/// All fact-family counters for one learner
///
/// Persisted as a map keyed by `"sum=<n>"`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, MasteryNode>", into = "BTreeMap<String, MasteryNode>")]
pub struct MasteryStore {
    nodes: BTreeMap<FactFamily, MasteryNode>,
}

impl MasteryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, family: FactFamily) -> Option<&MasteryNode> {
        self.nodes.get(&family)
    }

    pub fn node_mut(&mut self, family: FactFamily) -> &mut MasteryNode {
        self.nodes.entry(family).or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FactFamily, &MasteryNode)> {
        self.nodes.iter().map(|(family, node)| (*family, node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record one answered fact against its family
    pub fn record(&mut self, fact: AdditionFact, correct: bool, ts: i64) -> &MasteryNode {
        let node = self.node_mut(fact.family());
        node.observe(correct, ts);
        node
    }

    pub fn normalize(&mut self) {
        for node in self.nodes.values_mut() {
            node.normalize();
        }
    }
}

impl From<BTreeMap<String, MasteryNode>> for MasteryStore {
    fn from(raw: BTreeMap<String, MasteryNode>) -> Self {
        let mut nodes = BTreeMap::new();
        for (key, mut node) in raw {
            let Some(family) = FactFamily::parse_key(&key) else {
                continue;
            };
            node.normalize();
            nodes.insert(family, node);
        }
        Self { nodes }
    }
}

impl From<MasteryStore> for BTreeMap<String, MasteryNode> {
    fn from(store: MasteryStore) -> Self {
        store
            .nodes
            .into_iter()
            .map(|(family, node)| (family.key(), node))
            .collect()
    }
}
