//! Property-Based Tests for the planner, predictor and stage index
//!
//! Invariants:
//! - predict_success stays within [0.05, band.max + 0.05]
//! - generated plans never repeat an (a, b) pair and respect the addend limit
//! - addends of the first stage always resolve to an unlocked stage
//! - overlapping stages resolve to the earliest declared one

use std::collections::{BTreeMap, HashSet};

use proptest::prelude::*;

use galaxy_algo::{
    addition_stage_sequence, compute_stage_progress, generate_local_plan, predict_success,
    record_fact, AdditionFact, AddendTracking, LocalPlanRequest, MasteryNode, MasteryStore,
    ProblemHistory, StageConfig, StageIndex, TargetBand, TimelineEntry, MIN_PREDICTED_SUCCESS,
};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_band() -> impl Strategy<Value = TargetBand> {
    (0u32..=100u32, 0u32..=100u32).prop_map(|(a, b)| TargetBand::new(a as f64 / 100.0, b as f64 / 100.0))
}

fn arb_attempt() -> impl Strategy<Value = (u8, u8, bool)> {
    (0u8..=9u8, 0u8..=9u8, any::<bool>())
}

fn arb_tracking() -> impl Strategy<Value = AddendTracking> {
    prop::collection::vec(arb_attempt(), 0..80).prop_map(|attempts| {
        let mut tracking = AddendTracking::new();
        for (ts, (a, b, correct)) in attempts.into_iter().enumerate() {
            record_fact(&mut tracking, a, b, correct, ts as i64);
        }
        tracking
    })
}

proptest! {
    #[test]
    fn prop_predict_success_bounded(
        alpha in 0.0f64..1e6,
        beta in 0.0f64..1e6,
        band in arb_band(),
    ) {
        let node = MasteryNode { alpha, beta, streak: 0, last_asked_at: None };
        let p = predict_success(Some(&node), &band);
        prop_assert!(p >= MIN_PREDICTED_SUCCESS);
        prop_assert!(p <= band.ceiling());
    }

    #[test]
    fn prop_plan_has_no_duplicates(
        attempts in prop::collection::vec(arb_attempt(), 0..60),
        session_size in 0usize..40,
        addend_limit in 0u8..=9,
        seed in any::<u64>(),
    ) {
        let mut mastery = MasteryStore::new();
        let mut history: BTreeMap<String, ProblemHistory> = BTreeMap::new();
        let mut timeline = Vec::new();
        for (ts, (a, b, correct)) in attempts.into_iter().enumerate() {
            let fact = AdditionFact::new(a, b);
            mastery.record(fact, correct, ts as i64);
            let entry = history.entry(fact.key()).or_default();
            entry.attempts += 1;
            entry.last_attempt = Some(ts as i64);
            timeline.push(TimelineEntry { ts: ts as i64, a, b, correct, time_sec: 1.0 });
        }

        let request = LocalPlanRequest {
            mastery: &mastery,
            history: &history,
            timeline: &timeline,
            session_size,
            band: TargetBand::default(),
            target_success: 0.85,
            addend_limit,
            now: 0,
        };
        let plan = generate_local_plan(&request, seed);

        let pool = (addend_limit as usize + 1) * (addend_limit as usize + 1);
        prop_assert_eq!(plan.items.len(), session_size.min(pool));

        let mut seen = HashSet::new();
        for item in &plan.items {
            prop_assert!(seen.insert((item.a, item.b)));
            prop_assert!(item.a <= addend_limit && item.b <= addend_limit);
        }
    }

    #[test]
    fn prop_first_stage_addends_unlocked(tracking in arb_tracking()) {
        let stages = compute_stage_progress(&addition_stage_sequence(), &tracking, &BTreeMap::new());
        let index = StageIndex::build(&stages);
        for addend in 0..=stages[0].max_addend {
            let owner = index.owner(addend).map(|stage| stage.id.clone());
            prop_assert_eq!(owner.as_deref(), Some("add-up-to-3"));
            prop_assert!(!index.is_locked(addend));
        }
    }

    #[test]
    fn prop_earliest_stage_owns_overlap(
        ranges in prop::collection::vec((0u8..=9, 0u8..=9), 1..6),
        addend in 0u8..=9,
    ) {
        let sequence: Vec<StageConfig> = ranges
            .iter()
            .enumerate()
            .map(|(i, (x, y))| StageConfig::new(format!("stage-{i}"), *x.min(y), *x.max(y)))
            .collect();
        let stages = compute_stage_progress(&sequence, &BTreeMap::new(), &BTreeMap::new());
        let index = StageIndex::build(&stages);

        let expected = sequence
            .iter()
            .find(|config| config.min_addend <= addend && addend <= config.max_addend)
            .map(|config| config.id.clone());
        let owner = index.owner(addend).map(|stage| stage.id.clone());
        prop_assert_eq!(owner, expected);
    }
}

#[test]
fn overlapping_stages_scenario() {
    let sequence = vec![
        StageConfig::new("add-up-to-3", 0, 3),
        StageConfig::new("add-up-to-5", 0, 5).with_prerequisites(["add-up-to-3"]),
    ];
    let stages = compute_stage_progress(&sequence, &BTreeMap::new(), &BTreeMap::new());
    let index = StageIndex::build(&stages);

    let one = index.owner(1).unwrap();
    assert_eq!(one.id, "add-up-to-3");
    assert!(one.unlocked);

    let four = index.owner(4).unwrap();
    assert_eq!(four.id, "add-up-to-5");
    assert!(!four.unlocked);
}
