//! Recording answered problems
//!
//! One attempt touches every piece of learner state that depends on it:
//! per-fact history, timeline and daily totals, practice-day streak,
//! adaptive difficulty, review queue, family mastery, addend tracking and,
//! inside a stage session, the stage run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use galaxy_algo::{
    addition_stage_sequence, clear_if_recovered, compute_stage_progress,
    find_stage_by_id, predict_success, record_fact, resolve_max_unlocked_addend, schedule_review,
    AdditionFact, TargetBand, TimelineEntry, MAX_ADDEND,
};

use crate::response::AppError;
use crate::state::AppState;
use crate::store::{
    now_ms, Difficulty, LearnerState, RecentAttempt, StageRun, Statistics, StrugglingProblem,
    MAX_RECENT_ATTEMPTS, MAX_TIMELINE_ENTRIES,
};

const STRUGGLING_MIN_ATTEMPTS: u32 = 2;
const STRUGGLING_ACCURACY: f64 = 0.6;
const HARD_STREAK: u32 = 4;
const HARD_MAX_AVG_MS: f64 = 15_000.0;
const EASY_MISSES_IN_LAST_FIVE: usize = 3;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptInput {
    pub a: i64,
    pub b: i64,
    #[serde(default)]
    pub correct: Option<bool>,
    #[serde(default)]
    pub user_answer: Option<i64>,
    #[serde(default)]
    pub time_ms: Option<u64>,
    #[serde(default)]
    pub stage_id: Option<String>,
    /// Last problem of the stage session
    #[serde(default)]
    pub run_complete: bool,
}

/// Validated attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Attempt {
    pub fact: AdditionFact,
    pub correct: bool,
    pub time_ms: u64,
    pub stage_id: Option<String>,
    pub run_complete: bool,
}

impl AttemptInput {
    pub fn validate(self) -> Result<Attempt, AppError> {
        let addend = |value: i64, name: &str| {
            u8::try_from(value)
                .ok()
                .filter(|v| *v <= MAX_ADDEND)
                .ok_or_else(|| AppError::validation(format!("{name} must be between 0 and {MAX_ADDEND}")))
        };
        let fact = AdditionFact::new(addend(self.a, "a")?, addend(self.b, "b")?);

        let correct = match (self.correct, self.user_answer) {
            (_, Some(answer)) => answer == i64::from(fact.answer()),
            (Some(correct), None) => correct,
            (None, None) => return Err(AppError::validation("either correct or userAnswer is required")),
        };

        let stage_id = self.stage_id.map(|id| id.trim().to_string()).filter(|id| !id.is_empty());
        if let Some(id) = stage_id.as_deref() {
            if !addition_stage_sequence().iter().any(|stage| stage.id == id) {
                return Err(AppError::validation(format!("unknown stage: {id}")));
            }
        }

        Ok(Attempt {
            fact,
            correct,
            time_ms: self.time_ms.unwrap_or(0),
            stage_id,
            run_complete: self.run_complete,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRunResult {
    pub stage_id: String,
    pub attempts: u32,
    pub correct: u32,
    pub accuracy: f64,
    pub high_accuracy_runs: u32,
    pub stage_mastered: bool,
    pub badge_earned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
    pub correct: bool,
    pub answer: u8,
    pub predicted_success: f64,
    pub difficulty: Difficulty,
    pub consecutive_correct: u32,
    pub current_streak: u32,
    pub review_queue_length: usize,
    pub unlocked_addend_limit: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_run: Option<StageRunResult>,
}

pub async fn record_attempt(
    state: &AppState,
    learner_id: &str,
    input: AttemptInput,
) -> Result<AttemptOutcome, AppError> {
    let attempt = input.validate()?;
    let now = now_ms();
    let outcome = state
        .store()
        .update(learner_id, |learner| apply_attempt(learner, &attempt, now))?;

    debug!(
        learner_id = %learner_id,
        fact = %attempt.fact,
        correct = outcome.correct,
        difficulty = ?outcome.difficulty,
        "attempt recorded"
    );
    if let Some(run) = outcome.stage_run.as_ref().filter(|run| run.badge_earned) {
        info!(learner_id = %learner_id, stage_id = %run.stage_id, "stage badge earned");
    }
    Ok(outcome)
}

// ==================== State Updates ====================

/// Apply one attempt to the learner's state
pub fn apply_attempt(learner: &mut LearnerState, attempt: &Attempt, now: i64) -> AttemptOutcome {
    let fact = attempt.fact;
    let correct = attempt.correct;
    let key = fact.key();
    let time_sec = attempt.time_ms as f64 / 1000.0;

    let fact_accuracy = update_history(learner, attempt, now);
    update_totals(learner, correct, time_sec);

    let stats = &mut learner.statistics;
    stats.answers_timeline.push(TimelineEntry {
        ts: now,
        a: fact.a,
        b: fact.b,
        correct,
        time_sec,
    });
    if stats.answers_timeline.len() > MAX_TIMELINE_ENTRIES {
        let overflow = stats.answers_timeline.len() - MAX_TIMELINE_ENTRIES;
        stats.answers_timeline.drain(..overflow);
    }

    let (today, yesterday) = day_keys(now);
    let daily = stats.daily_totals.entry(today.clone()).or_default();
    daily.attempts += 1;
    daily.seconds += time_sec;
    if correct {
        daily.correct += 1;
    }
    update_streak(stats, &today, yesterday.as_deref());

    update_difficulty(learner, correct, attempt.time_ms);

    let queue = &mut learner.adaptive.needs_review;
    if correct {
        clear_if_recovered(queue, &key, fact_accuracy);
    } else {
        schedule_review(queue, fact, now);
    }

    learner.planner.mastery.record(fact, correct, now);
    record_fact(&mut learner.mastery_tracking, fact.a, fact.b, correct, now);

    let stage_run = attempt
        .stage_id
        .as_deref()
        .and_then(|stage_id| update_stage_run(learner, stage_id, correct, attempt.run_complete, now));

    let stages = compute_stage_progress(
        &addition_stage_sequence(),
        &learner.mastery_tracking,
        &learner.stage_achievements,
    );

    AttemptOutcome {
        correct,
        answer: fact.answer(),
        predicted_success: predict_success(learner.planner.mastery.get(fact.family()), &TargetBand::default()),
        difficulty: learner.adaptive.current_difficulty,
        consecutive_correct: learner.adaptive.consecutive_correct,
        current_streak: learner.statistics.current_streak,
        review_queue_length: learner.adaptive.needs_review.len(),
        unlocked_addend_limit: resolve_max_unlocked_addend(&stages).min(MAX_ADDEND),
        stage_run,
    }
}

/// Returns the fact's accuracy after the attempt
fn update_history(learner: &mut LearnerState, attempt: &Attempt, now: i64) -> f64 {
    let fact = attempt.fact;
    let stats = &mut learner.statistics;
    let problem = stats.problem_history.entry(fact.key()).or_default();
    problem.attempts += 1;
    if attempt.correct {
        problem.correct += 1;
    }
    problem.total_time_ms += attempt.time_ms;
    problem.last_attempt = Some(now);

    let accuracy = problem.accuracy();
    let attempts = problem.attempts;
    if attempts >= STRUGGLING_MIN_ATTEMPTS && accuracy < STRUGGLING_ACCURACY {
        let struggling = &mut stats.struggling_problems;
        match struggling.iter_mut().find(|p| p.a == fact.a && p.b == fact.b) {
            Some(existing) => existing.attempts = attempts,
            None => struggling.push(StrugglingProblem {
                a: fact.a,
                b: fact.b,
                attempts,
            }),
        }
        struggling.sort_by(|x, y| y.attempts.cmp(&x.attempts));
    }
    accuracy
}

fn update_totals(learner: &mut LearnerState, correct: bool, time_sec: f64) {
    let stats = &mut learner.statistics;
    stats.total_problems_attempted += 1;
    if correct {
        stats.total_correct += 1;
    }
    stats.total_time_spent += time_sec;
    stats.average_time_per_problem = stats.total_time_spent / stats.total_problems_attempted as f64;
}

/// `YYYY-MM-DD` for `now` and the day before, in UTC
fn day_keys(now: i64) -> (String, Option<String>) {
    let Some(datetime) = DateTime::<Utc>::from_timestamp_millis(now) else {
        return (String::from("1970-01-01"), None);
    };
    let today = datetime.date_naive();
    (
        today.format("%Y-%m-%d").to_string(),
        today.pred_opt().map(|day| day.format("%Y-%m-%d").to_string()),
    )
}

fn update_streak(stats: &mut Statistics, today: &str, yesterday: Option<&str>) {
    match stats.last_practice_day.as_deref() {
        Some(last) if last == today => {}
        Some(last) if Some(last) == yesterday => stats.current_streak += 1,
        _ => stats.current_streak = 1,
    }
    stats.longest_streak = stats.longest_streak.max(stats.current_streak);
    stats.last_practice_day = Some(today.to_string());
}

fn update_difficulty(learner: &mut LearnerState, correct: bool, time_ms: u64) {
    let adaptive = &mut learner.adaptive;
    if correct {
        adaptive.consecutive_correct += 1;
    } else {
        adaptive.consecutive_correct = 0;
        adaptive.struggles_detected += 1;
    }

    adaptive.recent_attempts.push(RecentAttempt { correct, ms: time_ms });
    if adaptive.recent_attempts.len() > MAX_RECENT_ATTEMPTS {
        let overflow = adaptive.recent_attempts.len() - MAX_RECENT_ATTEMPTS;
        adaptive.recent_attempts.drain(..overflow);
    }

    let recent = &adaptive.recent_attempts;
    let last_five = &recent[recent.len().saturating_sub(5)..];
    let misses = last_five.iter().filter(|r| !r.correct).count();
    let last_four = &recent[recent.len().saturating_sub(4)..];
    let avg_ms = last_four.iter().map(|r| r.ms as f64).sum::<f64>() / last_four.len().max(1) as f64;

    adaptive.current_difficulty = if adaptive.consecutive_correct >= HARD_STREAK && avg_ms <= HARD_MAX_AVG_MS {
        Difficulty::Hard
    } else if misses >= EASY_MISSES_IN_LAST_FIVE {
        Difficulty::Easy
    } else {
        Difficulty::Medium
    };
}

fn update_stage_run(
    learner: &mut LearnerState,
    stage_id: &str,
    correct: bool,
    run_complete: bool,
    now: i64,
) -> Option<StageRunResult> {
    let run = match learner.active_stage_run.take() {
        Some(run) if run.stage_id == stage_id => run,
        _ => StageRun {
            stage_id: stage_id.to_string(),
            attempts: 0,
            correct: 0,
        },
    };
    let run = StageRun {
        attempts: run.attempts + 1,
        correct: run.correct + u32::from(correct),
        ..run
    };

    if !run_complete {
        learner.active_stage_run = Some(run);
        return None;
    }

    let accuracy = (run.correct as f64 / run.attempts as f64 * 100.0).round();
    let achievement = learner.stage_achievements.entry(run.stage_id.clone()).or_default();
    achievement.record_run(accuracy);
    let high_accuracy_runs = achievement.high_accuracy_runs();

    let stages = compute_stage_progress(
        &addition_stage_sequence(),
        &learner.mastery_tracking,
        &learner.stage_achievements,
    );
    let stage_mastered = find_stage_by_id(&stages, &run.stage_id).is_some_and(|stage| stage.mastered);

    let mut badge_earned = false;
    if stage_mastered {
        if let Some(achievement) = learner.stage_achievements.get_mut(&run.stage_id) {
            if achievement.badge_earned_at.is_none() {
                achievement.badge_earned_at = Some(now);
                badge_earned = true;
            }
        }
    }

    Some(StageRunResult {
        stage_id: run.stage_id,
        attempts: run.attempts,
        correct: run.correct,
        accuracy,
        high_accuracy_runs,
        stage_mastered,
        badge_earned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use galaxy_algo::MasteryLevel;

    const DAY_MS: i64 = 86_400_000;

    fn attempt(a: u8, b: u8, correct: bool) -> Attempt {
        Attempt {
            fact: AdditionFact::new(a, b),
            correct,
            time_ms: 2_000,
            stage_id: None,
            run_complete: false,
        }
    }

    fn stage_attempt(a: u8, b: u8, correct: bool, run_complete: bool) -> Attempt {
        Attempt {
            stage_id: Some("add-up-to-3".to_string()),
            run_complete,
            ..attempt(a, b, correct)
        }
    }

    #[test]
    fn test_validate_input() {
        let input = AttemptInput {
            a: 3,
            b: 4,
            correct: Some(false),
            user_answer: Some(7),
            time_ms: None,
            stage_id: Some("  ".into()),
            run_complete: false,
        };
        let attempt = input.validate().unwrap();
        assert!(attempt.correct);
        assert_eq!(attempt.stage_id, None);

        let out_of_range = AttemptInput {
            a: 12,
            b: 1,
            correct: Some(true),
            user_answer: None,
            time_ms: None,
            stage_id: None,
            run_complete: false,
        };
        assert!(out_of_range.validate().is_err());

        let missing = AttemptInput {
            a: 1,
            b: 1,
            correct: None,
            user_answer: None,
            time_ms: None,
            stage_id: None,
            run_complete: false,
        };
        assert!(missing.validate().is_err());

        let unknown_stage = AttemptInput {
            a: 1,
            b: 1,
            correct: Some(true),
            user_answer: None,
            time_ms: None,
            stage_id: Some("add-up-to-42".into()),
            run_complete: false,
        };
        assert!(unknown_stage.validate().is_err());
    }

    #[test]
    fn test_attempt_updates_history_and_tracking() {
        let mut learner = LearnerState::new("ana", 0);
        let outcome = apply_attempt(&mut learner, &attempt(2, 3, true), 1_000);

        assert_eq!(outcome.answer, 5);
        let history = &learner.statistics.problem_history["2+3"];
        assert_eq!((history.attempts, history.correct, history.total_time_ms), (1, 1, 2_000));
        assert_eq!(learner.statistics.answers_timeline.len(), 1);
        assert_eq!(learner.statistics.total_problems_attempted, 1);
        assert_eq!(learner.mastery_tracking[&2].total_attempts, 1);
        assert_eq!(learner.mastery_tracking[&3].total_attempts, 1);
        assert_eq!(learner.mastery_tracking[&2].level, MasteryLevel::Learning);
        assert_eq!(learner.planner.mastery.len(), 1);
        assert!(outcome.predicted_success > 0.6);
        assert_eq!(learner.statistics.daily_totals.len(), 1);
    }

    #[test]
    fn test_missed_fact_is_reviewed_until_recovered() {
        let mut learner = LearnerState::new("ana", 0);
        apply_attempt(&mut learner, &attempt(4, 4, false), 0);
        assert_eq!(learner.adaptive.needs_review.len(), 1);
        assert_eq!(learner.statistics.struggling_problems.len(), 0);

        apply_attempt(&mut learner, &attempt(4, 4, false), 10);
        assert_eq!(learner.statistics.struggling_problems.len(), 1);
        let entry = learner.adaptive.needs_review[0].clone();
        assert_eq!(entry.interval_index, 1);
        assert_eq!(entry.due_at, 10 + 3_600_000);

        for ts in 0..7 {
            apply_attempt(&mut learner, &attempt(4, 4, true), 100 + ts);
        }
        // 7 of 9
        assert_eq!(learner.adaptive.needs_review, vec![entry]);
        apply_attempt(&mut learner, &attempt(4, 4, true), 200);
        assert!(learner.adaptive.needs_review.is_empty());
    }

    #[test]
    fn test_difficulty_adjusts() {
        let mut learner = LearnerState::new("ana", 0);
        for ts in 0..4 {
            apply_attempt(&mut learner, &attempt(1, 1, true), ts);
        }
        assert_eq!(learner.adaptive.current_difficulty, Difficulty::Hard);

        for ts in 10..13 {
            apply_attempt(&mut learner, &attempt(1, 2, false), ts);
        }
        assert_eq!(learner.adaptive.current_difficulty, Difficulty::Easy);
        assert_eq!(learner.adaptive.consecutive_correct, 0);
        assert_eq!(learner.adaptive.struggles_detected, 3);
    }

    #[test]
    fn test_slow_streak_stays_medium() {
        let mut learner = LearnerState::new("ana", 0);
        let slow = Attempt {
            time_ms: 20_000,
            ..attempt(1, 1, true)
        };
        for ts in 0..5 {
            apply_attempt(&mut learner, &slow, ts);
        }
        assert_eq!(learner.adaptive.current_difficulty, Difficulty::Medium);
    }

    #[test]
    fn test_practice_day_streak() {
        let mut learner = LearnerState::new("ana", 0);
        apply_attempt(&mut learner, &attempt(1, 1, true), 0);
        apply_attempt(&mut learner, &attempt(1, 1, true), 1_000);
        assert_eq!(learner.statistics.current_streak, 1);

        apply_attempt(&mut learner, &attempt(1, 1, true), DAY_MS);
        assert_eq!(learner.statistics.current_streak, 2);

        apply_attempt(&mut learner, &attempt(1, 1, true), 4 * DAY_MS);
        assert_eq!(learner.statistics.current_streak, 1);
        assert_eq!(learner.statistics.longest_streak, 2);
    }

    #[test]
    fn test_timeline_is_capped() {
        let mut learner = LearnerState::new("ana", 0);
        for ts in 0..(MAX_TIMELINE_ENTRIES as i64 + 5) {
            apply_attempt(&mut learner, &attempt(1, 2, true), ts);
        }
        let timeline = &learner.statistics.answers_timeline;
        assert_eq!(timeline.len(), MAX_TIMELINE_ENTRIES);
        assert_eq!(timeline[0].ts, 5);
    }

    #[test]
    fn test_stage_runs_unlock_next_stage() {
        let mut learner = LearnerState::new("ana", 0);
        assert_eq!(
            apply_attempt(&mut learner, &attempt(0, 0, true), 0).unlocked_addend_limit,
            3
        );

        let facts = [(0, 1), (1, 2), (2, 3), (3, 0)];
        let mut last = None;
        for run in 0..3 {
            for (i, (a, b)) in facts.iter().enumerate() {
                let complete = i == facts.len() - 1;
                let outcome = apply_attempt(&mut learner, &stage_attempt(*a, *b, true, complete), run * 10 + i as i64);
                if complete {
                    last = outcome.stage_run.clone();
                    assert!(learner.active_stage_run.is_none());
                } else {
                    assert!(outcome.stage_run.is_none());
                }
            }
        }

        let run = last.unwrap();
        assert_eq!(run.accuracy, 100.0);
        assert_eq!(run.high_accuracy_runs, 3);
        assert!(run.stage_mastered);
        assert!(run.badge_earned);
        assert!(learner.stage_achievements["add-up-to-3"].badge_earned_at.is_some());

        let outcome = apply_attempt(&mut learner, &attempt(1, 1, true), 100);
        assert_eq!(outcome.unlocked_addend_limit, 5);
    }
}
