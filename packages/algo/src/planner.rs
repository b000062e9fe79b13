//! Local practice planner
//!
//! Builds a session of addition facts without any remote service. The
//! session mixes four roles:
//! - weak: families ranked by predicted success, weakest first
//! - review: facts sampled from the recent timeline, misses first
//! - challenge: families predicted at or above [`CHALLENGE_THRESHOLD`]
//! - balanced: families closest to the target success rate
//!
//! Within a family the least-attempted, then least-recently attempted, fact
//! wins. A used-facts set keeps every `(a, b)` pair unique inside one plan;
//! slots a role cannot fill are back-filled by the balanced pass.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::mastery::MasteryStore;
use crate::predictor::predict_family;
use crate::types::{
    AdditionFact, FactFamily, PlanItem, PlanRole, ProblemHistory, TargetBand, TimelineEntry,
    CHALLENGE_THRESHOLD, MAX_ADDEND,
};

/// Source label of locally generated plans
pub const LOCAL_PLANNER_SOURCE: &str = "local planner";

/// How many timeline entries the review pass looks at
pub const REVIEW_WINDOW: usize = 20;

const WEAK_SHARE: f64 = 0.4;
const REVIEW_SHARE: f64 = 0.2;
const CHALLENGE_SHARE: f64 = 0.1;

// ==================== Data Structures ====================

/// Slots per role for one session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanQuotas {
    pub weak: usize,
    pub review: usize,
    pub challenge: usize,
    pub balanced: usize,
}

impl PlanQuotas {
    pub fn for_session(session_size: usize) -> Self {
        let n = session_size as f64;
        let mut remaining = session_size;
        let mut take = |wanted: usize| {
            let granted = wanted.min(remaining);
            remaining -= granted;
            granted
        };

        let weak = take((n * WEAK_SHARE).round() as usize);
        let review = take((n * REVIEW_SHARE).round() as usize);
        let challenge_wanted = (n * CHALLENGE_SHARE).round() as usize;
        let challenge = take(if session_size >= 4 {
            challenge_wanted.max(1)
        } else {
            challenge_wanted
        });
        let balanced = remaining;

        Self {
            weak,
            review,
            challenge,
            balanced,
        }
    }

    pub fn total(&self) -> usize {
        self.weak + self.review + self.challenge + self.balanced
    }
}

/// Inputs of one planning run
#[derive(Clone, Debug)]
pub struct LocalPlanRequest<'a> {
    pub mastery: &'a MasteryStore,
    /// Per-fact history keyed by `"a+b"`
    pub history: &'a BTreeMap<String, ProblemHistory>,
    /// Answered problems, oldest first
    pub timeline: &'a [TimelineEntry],
    pub session_size: usize,
    pub band: TargetBand,
    pub target_success: f64,
    /// Largest addend allowed in the plan
    pub addend_limit: u8,
    /// Epoch milliseconds
    pub now: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalPlan {
    pub plan_id: String,
    pub generated_at: i64,
    pub source: String,
    pub target_success: f64,
    pub items: Vec<PlanItem>,
}

// ==================== Main Implementation ====================

/// Seeded local planner
///
/// The RNG only breaks ties and samples review entries, so two planners with
/// the same seed produce identical plans for identical inputs.
pub struct LocalPlanner {
    rng: ChaCha8Rng,
}

struct PlanBuilder<'r, 'a> {
    request: &'r LocalPlanRequest<'a>,
    plan_id: String,
    target: f64,
    limit: u8,
    predictions: Vec<(FactFamily, f64)>,
    used: HashSet<AdditionFact>,
    items: Vec<PlanItem>,
}

impl LocalPlanner {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn generate(&mut self, request: &LocalPlanRequest<'_>) -> LocalPlan {
        let limit = request.addend_limit.min(MAX_ADDEND);
        let target = request.band.clamp_target(request.target_success);
        let predictions: Vec<(FactFamily, f64)> = FactFamily::all()
            .filter(|family| !family.facts_within(limit).is_empty())
            .map(|family| (family, predict_family(request.mastery, family, &request.band)))
            .collect();

        let mut builder = PlanBuilder {
            request,
            plan_id: format!("local-{}", request.now),
            target,
            limit,
            predictions,
            used: HashSet::new(),
            items: Vec::with_capacity(request.session_size),
        };

        let quotas = PlanQuotas::for_session(request.session_size);
        self.fill_weak(&mut builder, quotas.weak);
        self.fill_review(&mut builder, quotas.review);
        self.fill_challenge(&mut builder, quotas.challenge);
        let remaining = request.session_size.saturating_sub(builder.items.len());
        self.fill_balanced(&mut builder, remaining);

        LocalPlan {
            plan_id: builder.plan_id,
            generated_at: request.now,
            source: LOCAL_PLANNER_SOURCE.to_string(),
            target_success: target,
            items: builder.items,
        }
    }

    fn fill_weak(&mut self, builder: &mut PlanBuilder<'_, '_>, quota: usize) {
        let mut ranked = builder.predictions.clone();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let order: Vec<FactFamily> = ranked.into_iter().map(|(family, _)| family).collect();
        self.fill_round_robin(builder, &order, quota, PlanRole::Weak);
    }

    fn fill_review(&mut self, builder: &mut PlanBuilder<'_, '_>, quota: usize) {
        if quota == 0 {
            return;
        }
        let recent: Vec<&TimelineEntry> =
            builder.request.timeline.iter().rev().take(REVIEW_WINDOW).collect();

        let mut missed: Vec<AdditionFact> = Vec::new();
        let mut answered: Vec<AdditionFact> = Vec::new();
        for entry in recent {
            let fact = entry.fact();
            if missed.contains(&fact) || answered.contains(&fact) {
                continue;
            }
            if entry.correct {
                answered.push(fact);
            } else {
                missed.push(fact);
            }
        }
        missed.shuffle(&mut self.rng);
        answered.shuffle(&mut self.rng);

        let mut added = 0;
        for fact in missed.into_iter().chain(answered) {
            if added >= quota {
                break;
            }
            if builder.push(fact, PlanRole::Review) {
                added += 1;
            }
        }
    }

    fn fill_challenge(&mut self, builder: &mut PlanBuilder<'_, '_>, quota: usize) {
        let mut confident: Vec<FactFamily> = builder
            .predictions
            .iter()
            .filter(|(_, predicted)| *predicted >= CHALLENGE_THRESHOLD)
            .map(|(family, _)| *family)
            .collect();
        confident.shuffle(&mut self.rng);
        self.fill_round_robin(builder, &confident, quota, PlanRole::Challenge);
    }

    fn fill_balanced(&mut self, builder: &mut PlanBuilder<'_, '_>, quota: usize) {
        let target = builder.target;
        let mut ranked = builder.predictions.clone();
        ranked.sort_by(|a, b| {
            (a.1 - target)
                .abs()
                .total_cmp(&(b.1 - target).abs())
                .then(a.0.cmp(&b.0))
        });
        let order: Vec<FactFamily> = ranked.into_iter().map(|(family, _)| family).collect();
        self.fill_round_robin(builder, &order, quota, PlanRole::Balanced);
    }

    /// One fact per family per pass until the quota is met or a pass adds nothing
    fn fill_round_robin(
        &mut self,
        builder: &mut PlanBuilder<'_, '_>,
        families: &[FactFamily],
        quota: usize,
        role: PlanRole,
    ) {
        let mut added = 0;
        while added < quota {
            let mut progressed = false;
            for family in families {
                if added >= quota {
                    break;
                }
                if let Some(fact) = self.pick_in_family(builder, *family) {
                    if builder.push(fact, role) {
                        added += 1;
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
    }

    /// Least-attempted, then least-recently attempted, unused fact
    fn pick_in_family(&mut self, builder: &PlanBuilder<'_, '_>, family: FactFamily) -> Option<AdditionFact> {
        let mut candidates: Vec<AdditionFact> = family
            .facts_within(builder.limit)
            .into_iter()
            .filter(|fact| !builder.used.contains(fact))
            .collect();
        candidates.shuffle(&mut self.rng);
        candidates
            .into_iter()
            .min_by_key(|fact| {
                let history = builder.request.history.get(&fact.key());
                let attempts = history.map_or(0, |h| h.attempts);
                let last = history.and_then(|h| h.last_attempt).unwrap_or(i64::MIN);
                (attempts, last)
            })
    }
}

impl PlanBuilder<'_, '_> {
    fn push(&mut self, fact: AdditionFact, role: PlanRole) -> bool {
        if !fact.within_limit(self.limit) || !self.used.insert(fact) {
            return false;
        }
        let predicted = predict_family(self.request.mastery, fact.family(), &self.request.band);
        let index = self.items.len();
        self.items.push(PlanItem {
            id: format!("{}-{}", self.plan_id, index),
            a: fact.a,
            b: fact.b,
            answer: fact.answer(),
            role,
            predicted_success: predicted,
            display: fact.to_string(),
            source: LOCAL_PLANNER_SOURCE.to_string(),
            plan_id: self.plan_id.clone(),
        });
        true
    }
}

/// Generate a plan with a planner seeded from `seed`
pub fn generate_local_plan(request: &LocalPlanRequest<'_>, seed: u64) -> LocalPlan {
    LocalPlanner::with_seed(seed).generate(request)
}
