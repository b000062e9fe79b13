//! Property-Based Tests for learner state persistence
//!
//! Invariants:
//! - State Round-Trip: a state written by the store reloads unchanged
//! - Bounded lists: timeline, recent attempts and review queue stay capped
//! - Counter floor: every persisted mastery counter stays at or above the prior

use proptest::prelude::*;

use galaxy_algo::review::MAX_REVIEW_QUEUE;
use galaxy_algo::{AdditionFact, MASTERY_PRIOR};
use galaxy_backend::services::attempts::{apply_attempt, Attempt};
use galaxy_backend::store::{LearnerState, LearnerStore, MAX_RECENT_ATTEMPTS, MAX_TIMELINE_ENTRIES};

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_attempt() -> impl Strategy<Value = Attempt> {
    (
        0u8..=9u8,
        0u8..=9u8,
        any::<bool>(),
        0u64..=60_000u64,
        proptest::option::of(prop_oneof![Just("add-up-to-3"), Just("add-up-to-5")]),
        any::<bool>(),
    )
        .prop_map(|(a, b, correct, time_ms, stage, run_complete)| Attempt {
            fact: AdditionFact::new(a, b),
            correct,
            time_ms,
            stage_id: stage.map(str::to_string),
            run_complete,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_state_round_trip(attempts in prop::collection::vec(arb_attempt(), 0..40)) {
        let dir = tempfile::tempdir().unwrap();
        let written = {
            let store = LearnerStore::new(dir.path());
            for (i, attempt) in attempts.iter().enumerate() {
                store
                    .update("kid", |learner| apply_attempt(learner, attempt, i as i64 * 30_000))
                    .unwrap();
            }
            store.snapshot("kid").unwrap()
        };

        let reloaded = LearnerStore::new(dir.path()).snapshot("kid").unwrap();
        if attempts.is_empty() {
            prop_assert_eq!(reloaded.statistics.total_problems_attempted, 0);
        } else {
            let bytes = serde_json::to_vec(&written).unwrap();
            let mut expected: LearnerState = serde_json::from_slice(&bytes).unwrap();
            expected.normalize();
            prop_assert_eq!(reloaded, expected);
        }
    }

    #[test]
    fn prop_lists_stay_bounded(attempts in prop::collection::vec(arb_attempt(), 0..700)) {
        let dir = tempfile::tempdir().unwrap();
        let store = LearnerStore::new(dir.path());
        for (i, attempt) in attempts.iter().enumerate() {
            store
                .update("kid", |learner| apply_attempt(learner, attempt, i as i64 * 1_000))
                .unwrap();
        }
        let state = store.snapshot("kid").unwrap();

        prop_assert!(state.statistics.answers_timeline.len() <= MAX_TIMELINE_ENTRIES);
        prop_assert!(state.adaptive.recent_attempts.len() <= MAX_RECENT_ATTEMPTS);
        prop_assert!(state.adaptive.needs_review.len() <= MAX_REVIEW_QUEUE);
        prop_assert_eq!(state.statistics.total_problems_attempted, attempts.len() as u64);
        for (_, node) in state.planner.mastery.iter() {
            prop_assert!(node.alpha >= MASTERY_PRIOR && node.beta >= MASTERY_PRIOR);
        }
    }
}
