//! Stage progression and unlock resolution
//!
//! Stages cover addend ranges in ascending difficulty. A stage is unlocked
//! when it is first in the sequence or every prerequisite stage is mastered.
//!
//! Ranges overlap (`0-3`, `0-5`, ...), so the addend -> stage index is built
//! with first-claim-wins insertion: the earliest declared stage covering an
//! addend owns it and later stages never replace the owner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tracking::{AddendTracking, MasteryLevel};
use crate::types::{AdditionFact, MAX_ADDEND};

/// Attempts needed before accuracy alone can master an addend
pub const MASTERED_REQUIRED_ATTEMPTS: u32 = 3;

/// Attempts that, all correct, master an addend outright
pub const PERFECT_SAMPLE_ATTEMPTS: u32 = 2;

/// Run accuracy counted as a high-accuracy run
pub const HIGH_ACCURACY_RUN_THRESHOLD: f64 = 0.85;

// ==================== Configuration ====================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    pub id: String,
    pub label: String,
    pub min_addend: u8,
    pub max_addend: u8,
    pub mastery_threshold: f64,
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub required_perfect_runs: u32,
}

impl StageConfig {
    pub fn new(id: impl Into<String>, min_addend: u8, max_addend: u8) -> Self {
        let id = id.into();
        Self {
            label: format!("Addition {min_addend}-{max_addend}"),
            id,
            min_addend,
            max_addend,
            mastery_threshold: 0.9,
            prerequisites: Vec::new(),
            required_perfect_runs: 0,
        }
    }

    pub fn with_prerequisites<I, S>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prerequisites = prerequisites.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_required_runs(mut self, runs: u32) -> Self {
        self.required_perfect_runs = runs;
        self
    }

    pub fn addends(&self) -> Vec<u8> {
        if self.min_addend > self.max_addend {
            return Vec::new();
        }
        (self.min_addend..=self.max_addend).collect()
    }
}

/// The addition-within-10 progression: 0-3, 0-5, 0-7, 0-9
pub fn addition_stage_sequence() -> Vec<StageConfig> {
    let mut previous: Option<String> = None;
    [3u8, 5, 7, 9]
        .into_iter()
        .map(|max| {
            let id = format!("add-up-to-{max}");
            let mut stage = StageConfig::new(id.clone(), 0, max).with_required_runs(3);
            stage.label = format!("Addition with numbers 0-{max}");
            if let Some(prev) = previous.replace(id) {
                stage = stage.with_prerequisites([prev]);
            }
            stage
        })
        .collect()
}

// ==================== Achievements ====================

/// Completed stage runs, persisted per stage id
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StageAchievement {
    pub high_accuracy_runs: Option<u32>,
    /// Older name for `high_accuracy_runs`
    pub perfect_runs: Option<u32>,
    pub attempts: u32,
    pub last_accuracy: Option<f64>,
    pub best_accuracy: Option<f64>,
    pub badge_earned_at: Option<i64>,
}

impl StageAchievement {
    pub fn high_accuracy_runs(&self) -> u32 {
        self.high_accuracy_runs.or(self.perfect_runs).unwrap_or(0)
    }

    /// Record a finished run; `accuracy` is in percent
    pub fn record_run(&mut self, accuracy: f64) {
        let accuracy = if accuracy.is_finite() {
            accuracy.clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.attempts = self.attempts.saturating_add(1);
        self.last_accuracy = Some(accuracy);
        self.best_accuracy = Some(self.best_accuracy.map_or(accuracy, |best| best.max(accuracy)));
        let mut runs = self.high_accuracy_runs();
        if accuracy >= HIGH_ACCURACY_RUN_THRESHOLD * 100.0 {
            runs += 1;
        }
        self.high_accuracy_runs = Some(runs);
        self.perfect_runs = None;
    }
}

// ==================== Progress ====================

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageProgress {
    pub id: String,
    pub label: String,
    pub min_addend: u8,
    pub max_addend: u8,
    pub mastery_threshold: f64,
    pub prerequisites: Vec<String>,
    pub addends: Vec<u8>,
    pub unlocked: bool,
    pub prerequisites_met: bool,
    pub mastered: bool,
    pub per_addend_mastered: bool,
    pub stage_accuracy: f64,
    pub stage_accuracy_mastered: bool,
    pub meets_high_accuracy_requirement: bool,
    pub progress_percent: u32,
    pub total_attempts: u32,
    pub total_correct: u32,
    pub mastered_count: u32,
    pub next_target: Option<u8>,
    pub pending_count: u32,
    pub blocker_count: u32,
    pub unseen_count: u32,
    pub highest_mastered_addend: Option<u8>,
    pub high_accuracy_runs: u32,
    pub required_high_accuracy_runs: u32,
    pub total_stage_runs: u32,
    pub badge_earned_at: Option<i64>,
}

#[derive(Default)]
struct AddendSummary {
    total_attempts: u32,
    total_correct: u32,
    percent_sum: f64,
    mastered_count: u32,
    next_target: Option<u8>,
    pending_count: u32,
    blocker_count: u32,
    unseen_count: u32,
    highest_mastered_addend: Option<u8>,
}

fn summarize(addends: &[u8], tracking: &AddendTracking, threshold: f64) -> AddendSummary {
    let mut summary = AddendSummary::default();
    for &addend in addends {
        let node = tracking.get(&addend).cloned().unwrap_or_default();
        let attempts = node.total_attempts;
        let correct = node.correct_attempts;
        let percent = node.percent();

        let has_enough_attempts = attempts >= MASTERED_REQUIRED_ATTEMPTS;
        let has_perfect_sample = attempts >= PERFECT_SAMPLE_ATTEMPTS && correct == attempts;
        let meets_threshold = attempts > 0 && percent >= threshold * 100.0;
        let mastered = node.level == MasteryLevel::Mastered
            || (has_enough_attempts && meets_threshold)
            || has_perfect_sample;

        summary.total_attempts += attempts;
        summary.total_correct += correct;
        summary.percent_sum += percent;
        if mastered {
            summary.mastered_count += 1;
            summary.highest_mastered_addend = Some(
                summary
                    .highest_mastered_addend
                    .map_or(addend, |highest| highest.max(addend)),
            );
        } else {
            if attempts == 0 {
                summary.unseen_count += 1;
            } else if has_enough_attempts {
                summary.blocker_count += 1;
            } else {
                summary.pending_count += 1;
            }
            if summary.next_target.is_none() {
                summary.next_target = Some(addend);
            }
        }
    }
    summary
}

/// Evaluate every stage of `sequence` against the learner's tracking
///
/// Prerequisites are looked up among the stages already evaluated, so a
/// prerequisite naming a later or unknown stage is never met.
pub fn compute_stage_progress(
    sequence: &[StageConfig],
    tracking: &AddendTracking,
    achievements: &BTreeMap<String, StageAchievement>,
) -> Vec<StageProgress> {
    let mut stages: Vec<StageProgress> = Vec::with_capacity(sequence.len());

    for (index, config) in sequence.iter().enumerate() {
        let addends = config.addends();
        let summary = summarize(&addends, tracking, config.mastery_threshold);

        let progress_percent = if addends.is_empty() {
            0
        } else {
            (summary.percent_sum / addends.len() as f64).round() as u32
        };

        let achievement = achievements.get(&config.id).cloned().unwrap_or_default();
        let high_accuracy_runs = achievement.high_accuracy_runs();
        let meets_high_accuracy_requirement =
            config.required_perfect_runs == 0 || high_accuracy_runs >= config.required_perfect_runs;

        let per_addend_mastered = !addends.is_empty()
            && summary.blocker_count == 0
            && summary.unseen_count == 0
            && summary.mastered_count as usize == addends.len();

        let stage_accuracy = achievement
            .last_accuracy
            .filter(|v| v.is_finite())
            .or(achievement.best_accuracy.filter(|v| v.is_finite()))
            .unwrap_or(progress_percent as f64);
        let stage_accuracy_mastered = stage_accuracy >= config.mastery_threshold * 100.0;
        let mastered =
            per_addend_mastered && stage_accuracy_mastered && meets_high_accuracy_requirement;

        let prerequisites_met = config.prerequisites.iter().all(|required| {
            stages
                .iter()
                .find(|stage| &stage.id == required)
                .is_some_and(|stage| stage.mastered)
        });
        let unlocked = index == 0 || prerequisites_met;

        stages.push(StageProgress {
            id: config.id.clone(),
            label: config.label.clone(),
            min_addend: config.min_addend,
            max_addend: config.max_addend,
            mastery_threshold: config.mastery_threshold,
            prerequisites: config.prerequisites.clone(),
            addends,
            unlocked,
            prerequisites_met,
            mastered,
            per_addend_mastered,
            stage_accuracy,
            stage_accuracy_mastered,
            meets_high_accuracy_requirement,
            progress_percent,
            total_attempts: summary.total_attempts,
            total_correct: summary.total_correct,
            mastered_count: summary.mastered_count,
            next_target: summary.next_target,
            pending_count: summary.pending_count,
            blocker_count: summary.blocker_count,
            unseen_count: summary.unseen_count,
            highest_mastered_addend: summary.highest_mastered_addend,
            high_accuracy_runs,
            required_high_accuracy_runs: config.required_perfect_runs,
            total_stage_runs: achievement.attempts,
            badge_earned_at: achievement.badge_earned_at,
        });
    }

    stages
}

pub fn find_stage_by_id<'a>(stages: &'a [StageProgress], id: &str) -> Option<&'a StageProgress> {
    stages.iter().find(|stage| stage.id == id)
}

/// Highest `max_addend` among unlocked stages
///
/// With nothing unlocked, falls back to the first stage of the default
/// sequence.
pub fn resolve_max_unlocked_addend(stages: &[StageProgress]) -> u8 {
    stages
        .iter()
        .filter(|stage| stage.unlocked)
        .map(|stage| stage.max_addend)
        .max()
        .unwrap_or_else(default_addend_limit)
}

/// Unlocked addend limit for a learner, clamped to 0..=9
pub fn resolve_unlocked_addend_limit(
    tracking: &AddendTracking,
    achievements: &BTreeMap<String, StageAchievement>,
) -> u8 {
    let stages = compute_stage_progress(&addition_stage_sequence(), tracking, achievements);
    resolve_max_unlocked_addend(&stages).min(MAX_ADDEND)
}

pub fn filter_items_within_addend_limit<T, F>(items: Vec<T>, limit: u8, fact_of: F) -> Vec<T>
where
    F: Fn(&T) -> AdditionFact,
{
    items
        .into_iter()
        .filter(|item| fact_of(item).within_limit(limit))
        .collect()
}

fn default_addend_limit() -> u8 {
    addition_stage_sequence()
        .first()
        .map(|stage| stage.max_addend)
        .unwrap_or(3)
}

// ==================== Unlock Resolution ====================

/// Lock state of a single addend
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AddendLock<'a> {
    /// No stage covers the addend; it is not locked
    NoStage,
    Unlocked(&'a StageProgress),
    Locked(&'a StageProgress),
}

impl<'a> AddendLock<'a> {
    pub fn is_locked(&self) -> bool {
        matches!(self, AddendLock::Locked(_))
    }

    pub fn stage(&self) -> Option<&'a StageProgress> {
        match self {
            AddendLock::NoStage => None,
            AddendLock::Unlocked(stage) | AddendLock::Locked(stage) => Some(stage),
        }
    }
}

/// Addend -> owning stage
#[derive(Debug)]
pub struct StageIndex<'a> {
    stages: &'a [StageProgress],
    owners: BTreeMap<u8, usize>,
}

impl<'a> StageIndex<'a> {
    /// Build the index; `stages` must be in declaration order
    pub fn build(stages: &'a [StageProgress]) -> Self {
        let mut owners = BTreeMap::new();
        for (position, stage) in stages.iter().enumerate() {
            for &addend in &stage.addends {
                owners.entry(addend).or_insert(position);
            }
        }
        Self { stages, owners }
    }

    pub fn owner(&self, addend: u8) -> Option<&'a StageProgress> {
        let stages = self.stages;
        self.owners.get(&addend).map(|&position| &stages[position])
    }

    pub fn lock_info(&self, addend: u8) -> AddendLock<'a> {
        match self.owner(addend) {
            None => AddendLock::NoStage,
            Some(stage) if stage.unlocked => AddendLock::Unlocked(stage),
            Some(stage) => AddendLock::Locked(stage),
        }
    }

    pub fn is_locked(&self, addend: u8) -> bool {
        self.lock_info(addend).is_locked()
    }
}
